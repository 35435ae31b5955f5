//! RSS 2.0 serialization of cached items.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use thiserror::Error;

use crate::storage::CachedItem;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to write RSS document: {0}")]
    Write(String),
    #[error("Generated RSS contains invalid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Channel-level metadata of a published feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    pub email: String,
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Render `items` as a complete RSS 2.0 document.
///
/// Item descriptions carry the AI summary when one exists, else the
/// description the upstream feed provided.
pub fn render_rss(channel: &ChannelMeta, items: &[CachedItem]) -> Result<String, RenderError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    write(&mut writer, Event::Start(rss))?;
    write(&mut writer, Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "link", &channel.link)?;
    text_element(&mut writer, "description", &channel.description)?;
    text_element(
        &mut writer,
        "managingEditor",
        &format!("{} ({})", channel.email, channel.author),
    )?;

    let newest = items.iter().map(item_timestamp).max();
    if let Some(date) = newest.and_then(rfc2822) {
        text_element(&mut writer, "pubDate", &date)?;
    }

    for item in items {
        write_item(&mut writer, channel, item)?;
    }

    write(&mut writer, Event::End(BytesEnd::new("channel")))?;
    write(&mut writer, Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

fn write_item(
    writer: &mut XmlWriter,
    channel: &ChannelMeta,
    item: &CachedItem,
) -> Result<(), RenderError> {
    write(writer, Event::Start(BytesStart::new("item")))?;

    text_element(writer, "title", &item.title)?;
    if let Some(link) = &item.link {
        text_element(writer, "link", link)?;
    }
    if let Some(description) = item.summary.as_ref().or(item.description.as_ref()) {
        text_element(writer, "description", description)?;
    }
    let author = item.author.as_deref().unwrap_or(&channel.author);
    text_element(writer, "author", &format!("{} ({})", channel.email, author))?;

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    write(writer, Event::Start(guid))?;
    write(writer, Event::Text(BytesText::new(&item.guid)))?;
    write(writer, Event::End(BytesEnd::new("guid")))?;

    if let Some(date) = rfc2822(item_timestamp(item)) {
        text_element(writer, "pubDate", &date)?;
    }

    write(writer, Event::End(BytesEnd::new("item")))
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), RenderError> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn write(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), RenderError> {
    writer
        .write_event(event)
        .map_err(|e| RenderError::Write(e.to_string()))
}

fn item_timestamp(item: &CachedItem) -> i64 {
    item.published.unwrap_or(item.cached_at)
}

fn rfc2822(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|dt| dt.to_rfc2822())
}
