use anyhow::Result;
use feed_rs::parser;
use sha2::{Digest, Sha256};

/// One item of an upstream feed, normalized across RSS and Atom.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
}

/// A fetched and parsed upstream feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedDocument {
    /// URL the document was fetched from
    pub source_url: String,
    pub title: Option<String>,
    pub items: Vec<FeedEntry>,
}

/// Count items across all documents of one fetch.
pub fn count_items(documents: &[FeedDocument]) -> usize {
    documents.iter().map(|d| d.items.len()).sum()
}

pub fn parse_feed(source_url: &str, bytes: &[u8]) -> Result<FeedDocument> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let author = entry
                .authors
                .into_iter()
                .map(|p| p.name)
                .find(|name| !name.trim().is_empty());

            let guid = generate_guid(&entry.id, link.as_deref(), &title, published);

            FeedEntry {
                guid,
                title,
                link,
                description,
                author,
                published,
            }
        })
        .collect();

    Ok(FeedDocument {
        source_url: source_url.to_string(),
        title: feed.title.map(|t| t.content),
        items,
    })
}

fn generate_guid(
    existing: &str,
    link: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let input = format!(
        "{}|{}|{}",
        link.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <item>
        <guid>item-1</guid>
        <title>First</title>
        <link>https://example.com/1</link>
        <description>First body</description>
        <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
    </item>
    <item>
        <title>Second</title>
        <link>https://example.com/2</link>
    </item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let doc = parse_feed("https://example.com/feed.xml", RSS.as_bytes()).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Example"));
        assert_eq!(doc.items.len(), 2);

        let first = &doc.items[0];
        assert_eq!(first.guid, "item-1");
        assert_eq!(first.title, "First");
        assert_eq!(first.link.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.description.as_deref(), Some("First body"));
        assert_eq!(first.published, Some(1704067200));
    }

    #[test]
    fn test_guid_is_stable_across_parses() {
        let a = parse_feed("u", RSS.as_bytes()).unwrap();
        let b = parse_feed("u", RSS.as_bytes()).unwrap();
        assert!(!a.items[1].guid.is_empty());
        assert_eq!(a.items[1].guid, b.items[1].guid);
    }

    #[test]
    fn test_generate_guid_prefers_existing() {
        assert_eq!(generate_guid("  abc  ", None, "t", None), "abc");
        let hashed = generate_guid("", Some("https://example.com"), "t", Some(1));
        assert_eq!(hashed.len(), 64);
    }

    #[test]
    fn test_parse_invalid_xml() {
        assert!(parse_feed("u", b"<not valid xml").is_err());
    }

    #[test]
    fn test_count_items() {
        let doc = parse_feed("u", RSS.as_bytes()).unwrap();
        assert_eq!(count_items(&[doc.clone(), doc]), 4);
        assert_eq!(count_items(&[]), 0);
    }
}
