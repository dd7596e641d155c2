//! RSS 2.0 output for filtered feeds.

use std::fmt::Write;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;

use crate::domain::feed::{Feed, Item, Person};

const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

/// Render `feed` as an RSS 2.0 document terminated by a newline.
pub fn rss(feed: &Feed) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    let _ = write!(
        out,
        "<rss version=\"2.0\" xmlns:content=\"{CONTENT_NS}\">\n  <channel>\n"
    );

    element(&mut out, 4, "title", &feed.title);
    element(&mut out, 4, "link", &feed.link);
    element(&mut out, 4, "description", &feed.description);
    optional(&mut out, 4, "copyright", &feed.copyright);
    if let Some(editor) = feed.author.as_ref().and_then(person) {
        element(&mut out, 4, "managingEditor", &editor);
    }
    if let Some(date) = feed.published.or(feed.updated).and_then(rfc2822) {
        element(&mut out, 4, "pubDate", &date);
    }
    if let Some(date) = feed.updated.and_then(rfc2822) {
        element(&mut out, 4, "lastBuildDate", &date);
    }
    if let Some(image) = &feed.image {
        out.push_str("    <image>\n");
        element(&mut out, 6, "url", &image.url);
        element(&mut out, 6, "title", &image.title);
        element(&mut out, 6, "link", &feed.link);
        out.push_str("    </image>\n");
    }

    for item in &feed.items {
        render_item(&mut out, item);
    }

    out.push_str("  </channel>\n</rss>\n");
    out
}

fn render_item(out: &mut String, item: &Item) {
    out.push_str("    <item>\n");
    element(out, 6, "title", &item.title);
    element(out, 6, "link", &item.link);
    element(out, 6, "description", &item.description);
    if !item.content.is_empty() {
        let _ = writeln!(
            out,
            "      <content:encoded>{}</content:encoded>",
            cdata(&item.content)
        );
    }
    if let Some(author) = item.author.as_ref().and_then(person) {
        element(out, 6, "author", &author);
    }
    optional(out, 6, "guid", &item.guid);
    if let Some(date) = item.published.or(item.updated).and_then(rfc2822) {
        element(out, 6, "pubDate", &date);
    }
    out.push_str("    </item>\n");
}

fn element(out: &mut String, indent: usize, name: &str, value: &str) {
    let _ = writeln!(
        out,
        "{:indent$}<{name}>{}</{name}>",
        "",
        xml_escape(value),
        indent = indent
    );
}

fn optional(out: &mut String, indent: usize, name: &str, value: &str) {
    if !value.is_empty() {
        element(out, indent, name, value);
    }
}

/// `email (name)`, or whichever part is present.
fn person(person: &Person) -> Option<String> {
    match (person.email.is_empty(), person.name.is_empty()) {
        (false, false) => Some(format!("{} ({})", person.email, person.name)),
        (false, true) => Some(person.email.clone()),
        (true, false) => Some(person.name.clone()),
        (true, true) => None,
    }
}

fn rfc2822(date: OffsetDateTime) -> Option<String> {
    date.format(&Rfc2822).ok()
}

fn cdata(value: &str) -> String {
    format!("<![CDATA[{}]]>", value.replace("]]>", "]]]]><![CDATA[>"))
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
