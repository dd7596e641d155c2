//! Item filters selected by query parameters.

use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};

use crate::domain::feed::Item;
use crate::domain::query::QueryParams;

const LATEST_WINDOW: Duration = Duration::days(7);

/// Server-wide filter configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub mute_authors: Vec<String>,
    pub mute_urls: Vec<String>,
    pub latest_only: bool,
}

impl FilterOptions {
    /// Split a comma separated list, dropping empty terms.
    pub fn split_terms(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Description,
    Link,
    Author,
}

impl TextField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "title" => Some(Self::Title),
            "description" => Some(Self::Description),
            "link" => Some(Self::Link),
            "author" => Some(Self::Author),
            _ => None,
        }
    }

    fn read<'a>(self, item: &'a Item) -> Option<&'a str> {
        match self {
            Self::Title => Some(&item.title),
            Self::Description => Some(&item.description),
            Self::Link => Some(&item.link),
            Self::Author => item.author_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Updated,
    Published,
}

impl DateField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "updated_at" => Some(Self::Updated),
            "published_at" => Some(Self::Published),
            _ => None,
        }
    }

    fn read(self, item: &Item) -> Option<OffsetDateTime> {
        match self {
            Self::Updated => item.updated,
            Self::Published => item.published,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    Equal,
    NotEqual,
    Contains,
    NotContains,
}

impl TextMatch {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "equal" => Some(Self::Equal),
            "not_equal" => Some(Self::NotEqual),
            "contains" => Some(Self::Contains),
            "not_contains" => Some(Self::NotContains),
            _ => None,
        }
    }

    /// A missing value fails positive matches and passes negative ones.
    fn test(self, value: Option<&str>, operand: &str) -> bool {
        match (self, value) {
            (Self::Equal, Some(value)) => value == operand,
            (Self::NotEqual, Some(value)) => value != operand,
            (Self::Contains, Some(value)) => value.contains(operand),
            (Self::NotContains, Some(value)) => !value.contains(operand),
            (Self::Equal | Self::Contains, None) => false,
            (Self::NotEqual | Self::NotContains, None) => true,
        }
    }
}

/// A single predicate over feed items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Text {
        field: TextField,
        op: TextMatch,
        operand: String,
    },
    /// Keep items dated strictly after the bound. `None` keeps everything.
    From {
        field: DateField,
        bound: Option<OffsetDateTime>,
    },
    Latest(DateField),
    AnyLatest,
    MuteAuthors(Vec<String>),
    MuteUrls(Vec<String>),
}

impl Filter {
    /// Build the filter named by a query parameter, if it is one.
    pub fn parse(name: &str, value: &str, options: &FilterOptions) -> Option<Self> {
        match name {
            "latest" => return Some(Self::AnyLatest),
            "mute_authors" => return Some(Self::MuteAuthors(options.mute_authors.clone())),
            "mute_urls" => return Some(Self::MuteUrls(options.mute_urls.clone())),
            _ => {}
        }

        let (field, op) = name.split_once('.')?;
        if let Some(field) = TextField::parse(field) {
            return TextMatch::parse(op).map(|op| Self::Text {
                field,
                op,
                operand: value.to_string(),
            });
        }

        let field = DateField::parse(field)?;
        match op {
            "from" => Some(Self::From {
                field,
                bound: OffsetDateTime::parse(value, &Rfc3339).ok(),
            }),
            "latest" => Some(Self::Latest(field)),
            _ => None,
        }
    }

    pub fn matches(&self, item: &Item, now: OffsetDateTime) -> bool {
        match self {
            Self::Text { field, op, operand } => op.test(field.read(item), operand),
            Self::From { field, bound } => after(*bound, field.read(item)),
            Self::Latest(field) => after(Some(now - LATEST_WINDOW), field.read(item)),
            Self::AnyLatest => {
                let bound = Some(now - LATEST_WINDOW);
                after(bound, item.updated) || after(bound, item.published)
            }
            Self::MuteAuthors(terms) => {
                let author_ok = item.author.as_ref().is_none_or(|author| {
                    !mentions(terms, &author.name) && !mentions(terms, &author.email)
                });
                author_ok
                    && !mentions(terms, &item.link)
                    && !mentions(terms, &item.title)
                    && !mentions(terms, &item.description)
            }
            Self::MuteUrls(terms) => !mentions(terms, &item.link),
        }
    }
}

fn after(bound: Option<OffsetDateTime>, date: Option<OffsetDateTime>) -> bool {
    match (bound, date) {
        (Some(bound), Some(date)) => bound < date,
        _ => true,
    }
}

fn mentions(terms: &[String], haystack: &str) -> bool {
    terms
        .iter()
        .any(|term| !term.is_empty() && haystack.contains(term.as_str()))
}

/// All filters for one request; an item is kept when every filter passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn from_params(params: &QueryParams, options: &FilterOptions) -> Self {
        let mut filters = Vec::new();
        if options.latest_only {
            filters.push(Filter::Latest(DateField::Published));
            filters.push(Filter::Latest(DateField::Updated));
        }
        filters.extend(
            params
                .pairs()
                .filter_map(|(name, value)| Filter::parse(name, value, options)),
        );
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn keep(&self, item: &Item, now: OffsetDateTime) -> bool {
        self.filters.iter().all(|filter| filter.matches(item, now))
    }
}
