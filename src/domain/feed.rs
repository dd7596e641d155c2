//! Parsed feed representation shared by the parser, filters, and renderer.

use time::OffsetDateTime;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Person {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub url: String,
    pub title: String,
}

/// A single entry of a feed, normalized across RSS and Atom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: String,
    pub guid: String,
    pub author: Option<Person>,
    pub published: Option<OffsetDateTime>,
    pub updated: Option<OffsetDateTime>,
}

impl Item {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().map(|author| author.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub copyright: String,
    pub author: Option<Person>,
    pub published: Option<OffsetDateTime>,
    pub updated: Option<OffsetDateTime>,
    pub image: Option<Image>,
    pub items: Vec<Item>,
}
