//! Summarizing RSS relay.
//!
//! Periodically fetches groups of upstream feeds, summarizes new items with
//! Google Gemini (optionally scraping the full article first), caches them
//! per group in SQLite, and republishes each group as an RSS 2.0 endpoint.

pub mod client;
pub mod config;
pub mod content;
pub mod feed;
pub mod pipeline;
pub mod render;
pub mod run;
pub mod server;
pub mod storage;
pub mod summarize;
