//! RSS 2.0, RSS 1.0 (RDF) and Atom 1.0 parsing into [`Feed`].

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

use crate::domain::feed::{Feed, Image, Item, Person};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document contains no feed")]
    Empty,
    #[error("unsupported feed format with root element `{0}`")]
    UnsupportedFormat(String),
    #[error("malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Rss,
    Rdf,
    Atom,
}

impl Format {
    fn detect(root: &str) -> Option<Self> {
        match local(root) {
            "rss" => Some(Self::Rss),
            "RDF" => Some(Self::Rdf),
            "feed" => Some(Self::Atom),
            _ => None,
        }
    }

    fn item_element(self) -> &'static str {
        match self {
            Self::Rss | Self::Rdf => "item",
            Self::Atom => "entry",
        }
    }

    fn channel_element(self) -> &'static str {
        match self {
            Self::Rss | Self::Rdf => "channel",
            Self::Atom => "feed",
        }
    }
}

/// Parse a feed document.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    let mut builder: Option<FeedBuilder> = None;

    loop {
        let event = reader.read_event().map_err(|err| ParseError::Xml {
            position: reader.buffer_position() as u64,
            message: err.to_string(),
        })?;

        match event {
            Event::Start(start) => {
                let name = qname(&start);
                match builder.as_mut() {
                    Some(builder) => builder.open(name, &start),
                    None => {
                        let format = Format::detect(&name)
                            .ok_or_else(|| ParseError::UnsupportedFormat(name.clone()))?;
                        let mut root = FeedBuilder::new(format);
                        root.open(name, &start);
                        builder = Some(root);
                    }
                }
            }
            Event::Empty(start) => {
                let name = qname(&start);
                match builder.as_mut() {
                    Some(builder) => builder.empty(&name, &start),
                    None => {
                        return match Format::detect(&name) {
                            Some(_) => Ok(Feed::default()),
                            None => Err(ParseError::UnsupportedFormat(name)),
                        };
                    }
                }
            }
            Event::Text(text) => {
                if let Some(builder) = builder.as_mut() {
                    match text.unescape() {
                        Ok(value) => builder.text.push_str(&value),
                        Err(_) => builder.text.push_str(&String::from_utf8_lossy(&text)),
                    }
                }
            }
            Event::CData(data) => {
                if let Some(builder) = builder.as_mut() {
                    builder
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(builder) = builder.as_mut() {
                    builder.close();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    builder.map(FeedBuilder::finish).ok_or(ParseError::Empty)
}

struct FeedBuilder {
    format: Format,
    feed: Feed,
    item: Option<Item>,
    author: Option<Person>,
    stack: Vec<String>,
    text: String,
}

impl FeedBuilder {
    fn new(format: Format) -> Self {
        Self {
            format,
            feed: Feed::default(),
            item: None,
            author: None,
            stack: Vec::new(),
            text: String::new(),
        }
    }

    fn parent(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    fn open(&mut self, name: String, start: &BytesStart<'_>) {
        self.text.clear();
        let item_element = self.format.item_element();

        match name.as_str() {
            n if n == item_element => self.item = Some(Item::default()),
            "image" if self.format != Format::Atom && self.item.is_none() => {
                self.feed.image.get_or_insert_with(Image::default);
            }
            "author" if self.format == Format::Atom => self.author = Some(Person::default()),
            "link" if self.format == Format::Atom => self.atom_link(start),
            _ => {}
        }

        self.stack.push(name);
    }

    fn empty(&mut self, name: &str, start: &BytesStart<'_>) {
        if name == "link" && self.format == Format::Atom {
            self.atom_link(start);
        }
    }

    fn atom_link(&mut self, start: &BytesStart<'_>) {
        let parent = self.parent().map(str::to_string);
        let rel = attribute(start, "rel");
        if !matches!(rel.as_deref(), None | Some("alternate")) {
            return;
        }
        let Some(href) = attribute(start, "href") else {
            return;
        };

        let target = match (parent.as_deref(), self.item.as_mut()) {
            (Some("entry"), Some(item)) => &mut item.link,
            (Some("feed"), _) => &mut self.feed.link,
            _ => return,
        };
        if target.is_empty() {
            *target = href;
        }
    }

    fn close(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };
        let value = std::mem::take(&mut self.text).trim().to_string();
        let parent = self.parent().unwrap_or_default().to_string();

        if name == self.format.item_element() {
            if let Some(item) = self.item.take() {
                self.feed.items.push(item);
            }
            return;
        }

        if self.format == Format::Atom && name == "author" {
            let person = self.author.take().filter(|person| !is_blank(person));
            match parent.as_str() {
                "entry" => {
                    if let Some(item) = self.item.as_mut() {
                        item.author = person;
                    }
                }
                "feed" => self.feed.author = person,
                _ => {}
            }
            return;
        }

        if parent == "author" {
            if let Some(person) = self.author.as_mut() {
                match name.as_str() {
                    "name" => person.name = value,
                    "email" => person.email = value,
                    _ => {}
                }
            }
            return;
        }

        if parent == "image" {
            if let Some(image) = self.feed.image.as_mut() {
                match name.as_str() {
                    "url" => image.url = value,
                    "title" => image.title = value,
                    _ => {}
                }
            }
            return;
        }

        if parent == self.format.item_element() {
            if let Some(item) = self.item.as_mut() {
                assign_item(item, &name, value);
            }
            return;
        }

        if parent == self.format.channel_element() {
            assign_channel(&mut self.feed, &name, value);
        }
    }

    fn finish(self) -> Feed {
        self.feed
    }
}

fn assign_item(item: &mut Item, name: &str, value: String) {
    match name {
        "title" => item.title = value,
        "description" | "summary" => item.description = value,
        "content:encoded" | "content" => item.content = value,
        "link" => {
            if item.link.is_empty() {
                item.link = value;
            }
        }
        "guid" | "id" => item.guid = value,
        "author" => item.author = rss_person(&value),
        "dc:creator" => {
            if item.author.is_none() && !value.is_empty() {
                item.author = Some(Person {
                    name: value,
                    email: String::new(),
                });
            }
        }
        "pubDate" | "published" | "dc:date" => item.published = parse_date(&value),
        "updated" => item.updated = parse_date(&value),
        _ => {}
    }
}

fn assign_channel(feed: &mut Feed, name: &str, value: String) {
    match name {
        "title" => feed.title = value,
        "description" | "subtitle" => feed.description = value,
        "link" => {
            if feed.link.is_empty() {
                feed.link = value;
            }
        }
        "copyright" | "rights" => feed.copyright = value,
        "managingEditor" => feed.author = rss_person(&value),
        "pubDate" | "published" => feed.published = parse_date(&value),
        "lastBuildDate" | "updated" | "dc:date" => feed.updated = parse_date(&value),
        _ => {}
    }
}

/// Parse RSS person syntax: `email (Name)`, a bare address, or a bare name.
fn rss_person(value: &str) -> Option<Person> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some((email, rest)) = value.split_once('(')
        && let Some(name) = rest.strip_suffix(')')
    {
        return Some(Person {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
        });
    }

    if value.contains('@') && !value.contains(' ') {
        return Some(Person {
            name: String::new(),
            email: value.to_string(),
        });
    }

    Some(Person {
        name: value.to_string(),
        email: String::new(),
    })
}

/// Parse RFC 3339 or RFC 2822 timestamps.
pub fn parse_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }

    let parsed = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let offset = UtcOffset::from_whole_seconds(parsed.offset().local_minus_utc()).ok()?;
    OffsetDateTime::from_unix_timestamp(parsed.timestamp())
        .ok()
        .map(|utc| utc.to_offset(offset))
}

fn is_blank(person: &Person) -> bool {
    person.name.is_empty() && person.email.is_empty()
}

fn qname(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Option<String> {
    let attr = start.try_get_attribute(name).ok().flatten()?;
    attr.unescape_value().ok().map(|value| value.into_owned())
}
