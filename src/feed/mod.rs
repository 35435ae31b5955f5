//! Upstream feed retrieval.
//!
//! - [`fetcher`] - HTTP fetching with timeouts, retry and size limits
//! - [`parser`] - RSS/Atom parsing via `feed-rs` into [`FeedDocument`]s

mod fetcher;
mod parser;

pub use fetcher::{fetch_all, fetch_document, FetchError};
pub use parser::{count_items, parse_feed, FeedDocument, FeedEntry};
