//! Per-group facade over fetching, caching, summarizing and rendering.
//!
//! [`FeedBackend`] is what pipelines and the publisher talk to;
//! [`FeedClient`] is the production implementation, owning one group's
//! source list, cache database and summarizer.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use secrecy::SecretString;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::content::ScrapeSession;
use crate::feed::{count_items, fetch_all, FeedDocument, FeedEntry, FetchError};
use crate::render::{render_rss, ChannelMeta, RenderError};
use crate::storage::{CachedItem, Database, DatabaseError, NewItem};
use crate::summarize::{
    GeminiClient, SummarizeError, Summarizer, SummaryRequest, DEFAULT_GEMINI_BASE_URL,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No Google AI API key configured")]
    NoApiKeys,
    #[error("No feed URLs configured")]
    NoFeedUrls,
    #[error("Invalid feed URL '{0}'")]
    InvalidFeedUrl(String),
    #[error("Failed to open cache: {0}")]
    Database(#[from] DatabaseError),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to create summarizer: {0}")]
    Summarizer(#[from] SummarizeError),
    /// Every source of the group failed; carries the first failure
    #[error("All feed sources failed, first error: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("{failed} of {total} items could not be summarized")]
    Partial { failed: usize, total: usize },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Outcome of a successful enrichment step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    /// Items considered (not previously cached)
    pub total: usize,
    /// Items newly written to the cache
    pub cached: usize,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Operations a feed group needs from its backing client.
#[async_trait]
pub trait FeedBackend: Send + Sync {
    /// Fetch every source. With `include_seen = false`, already-cached
    /// items are filtered out.
    async fn fetch_feeds(&self, include_seen: bool) -> Result<Vec<FeedDocument>, ClientError>;

    /// Summarize and cache the items of `documents` not yet cached,
    /// scraping full articles through `session` when one is given.
    async fn summarize_and_cache(
        &self,
        documents: &[FeedDocument],
        session: Option<&dyn ScrapeSession>,
    ) -> Result<EnrichSummary, EnrichError>;

    async fn list_cached_items(&self, include_read: bool) -> anyhow::Result<Vec<CachedItem>>;

    /// Mark `items` as read; returns how many changed state.
    async fn mark_as_read(&self, items: &[CachedItem]) -> anyhow::Result<u64>;

    /// Evict read items older than the retention window.
    async fn delete_old_cached_items(&self) -> anyhow::Result<u64>;

    fn publish_xml(
        &self,
        channel: &ChannelMeta,
        items: &[CachedItem],
    ) -> Result<String, RenderError>;
}

// ============================================================================
// FeedClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on each upstream request (feeds and model calls)
    pub fetch_timeout: Duration,
    /// Skip caching items whose summary failed so they are retried
    pub drop_failed_summaries: bool,
    /// Read items older than this are evicted
    pub retention: Duration,
    pub gemini_base_url: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(60),
            drop_failed_summaries: false,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }
}

pub struct FeedClient {
    http: reqwest::Client,
    feed_urls: Vec<String>,
    db: Database,
    summarizer: Arc<dyn Summarizer>,
    models: Vec<String>,
    language: String,
    verbose: bool,
    options: ClientOptions,
}

impl FeedClient {
    /// Build a client for one feed group and open its cache at `cache_path`.
    ///
    /// # Errors
    ///
    /// Fails on an empty key pool, an empty or malformed source list, or a
    /// cache that cannot be opened.
    pub async fn new(
        api_keys: Arc<[SecretString]>,
        feed_urls: Vec<String>,
        cache_path: &Path,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        if api_keys.is_empty() {
            return Err(ClientError::NoApiKeys);
        }
        if feed_urls.is_empty() {
            return Err(ClientError::NoFeedUrls);
        }
        for url in &feed_urls {
            let valid = Url::parse(url)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(ClientError::InvalidFeedUrl(url.clone()));
            }
        }

        let http = reqwest::Client::builder()
            .redirect(redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(options.fetch_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let summarizer = GeminiClient::new(http.clone(), api_keys, options.fetch_timeout)?
            .with_base_url(options.gemini_base_url.clone());

        let db = Database::open(&cache_path.to_string_lossy()).await?;

        Ok(Self {
            http,
            feed_urls,
            db,
            summarizer: Arc::new(summarizer),
            models: vec![crate::config::DEFAULT_GOOGLE_AI_MODEL.to_string()],
            language: crate::config::DEFAULT_DESIRED_LANGUAGE.to_string(),
            verbose: false,
            options,
        })
    }

    /// Set the model fallback list, the summary language and verbosity.
    ///
    /// An empty model list keeps the current one.
    pub fn configure(&mut self, models: Vec<String>, language: impl Into<String>, verbose: bool) {
        if !models.is_empty() {
            self.models = models;
        }
        self.language = language.into();
        self.verbose = verbose;
    }

    /// Replace the summarizer backend.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Try each configured model in order until one returns a summary.
    async fn summarize_with_fallback(
        &self,
        request: &SummaryRequest<'_>,
    ) -> Result<String, SummarizeError> {
        let mut last_error = None;

        for model in &self.models {
            match self.summarizer.summarize(model, request).await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    tracing::debug!(model = %model, error = %e, "Model failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(SummarizeError::AllModelsFailed(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Article text to summarize: scraped page, else feed body, else title.
    async fn article_text(&self, entry: &FeedEntry, session: Option<&dyn ScrapeSession>) -> String {
        if let (Some(session), Some(link)) = (session, entry.link.as_deref()) {
            match session.scrape(link).await {
                Ok(text) if !text.trim().is_empty() => return text,
                Ok(_) => tracing::debug!(url = %link, "Scraped page was empty, using feed content"),
                Err(e) => {
                    tracing::warn!(url = %link, error = %e, "Scrape failed, using feed content")
                }
            }
        }

        entry
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&entry.title)
            .to_string()
    }
}

#[async_trait]
impl FeedBackend for FeedClient {
    async fn fetch_feeds(&self, include_seen: bool) -> Result<Vec<FeedDocument>, ClientError> {
        let results = fetch_all(&self.http, &self.feed_urls, self.options.fetch_timeout).await;

        let mut documents = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (url, result) in results {
            match result {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!(feed = %url, error = %e, "Failed to fetch feed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if documents.is_empty() {
            if let Some(e) = first_error {
                return Err(ClientError::Fetch(e));
            }
        }

        if !include_seen {
            let guids: Vec<String> = documents
                .iter()
                .flat_map(|d| d.items.iter().map(|i| i.guid.clone()))
                .collect();
            let known = self
                .db
                .known_guids(&guids)
                .await
                .context("Failed to look up cached items")?;
            for document in &mut documents {
                document.items.retain(|item| !known.contains(&item.guid));
            }
        }

        tracing::debug!(
            sources = self.feed_urls.len(),
            items = count_items(&documents),
            "Fetched feeds"
        );
        Ok(documents)
    }

    async fn summarize_and_cache(
        &self,
        documents: &[FeedDocument],
        session: Option<&dyn ScrapeSession>,
    ) -> Result<EnrichSummary, EnrichError> {
        let guids: Vec<String> = documents
            .iter()
            .flat_map(|d| d.items.iter().map(|i| i.guid.clone()))
            .collect();
        let mut seen: HashSet<String> = self
            .db
            .known_guids(&guids)
            .await
            .context("Failed to look up cached items")?;

        let mut summary = EnrichSummary::default();
        let mut failed = 0;

        for entry in documents.iter().flat_map(|d| d.items.iter()) {
            // Also dedupes an item listed by two sources
            if !seen.insert(entry.guid.clone()) {
                continue;
            }
            summary.total += 1;

            let text = self.article_text(entry, session).await;
            let request = SummaryRequest {
                title: &entry.title,
                url: entry.link.as_deref(),
                text: &text,
                language: &self.language,
            };

            let mut item = NewItem {
                guid: entry.guid.clone(),
                title: entry.title.clone(),
                link: entry.link.clone(),
                description: entry.description.clone(),
                author: entry.author.clone(),
                published: entry.published,
                ..Default::default()
            };

            match self.summarize_with_fallback(&request).await {
                Ok(text) => {
                    if self.verbose {
                        tracing::info!(title = %entry.title, "Summarized item");
                    }
                    item.summary = Some(text);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(title = %entry.title, error = %e, "Failed to summarize item");
                    if self.options.drop_failed_summaries {
                        continue;
                    }
                    item.summary_error = Some(e.to_string());
                }
            }

            if self
                .db
                .insert_item(&item)
                .await
                .with_context(|| format!("Failed to cache item '{}'", entry.guid))?
            {
                summary.cached += 1;
            }
        }

        if failed > 0 {
            return Err(EnrichError::Partial {
                failed,
                total: summary.total,
            });
        }
        Ok(summary)
    }

    async fn list_cached_items(&self, include_read: bool) -> anyhow::Result<Vec<CachedItem>> {
        self.db
            .list_items(include_read)
            .await
            .context("Failed to list cached items")
    }

    async fn mark_as_read(&self, items: &[CachedItem]) -> anyhow::Result<u64> {
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        self.db
            .mark_items_read(&ids)
            .await
            .context("Failed to mark items as read")
    }

    async fn delete_old_cached_items(&self) -> anyhow::Result<u64> {
        let retention = i64::try_from(self.options.retention.as_secs()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp().saturating_sub(retention);
        self.db
            .delete_read_items_older_than(cutoff)
            .await
            .context("Failed to delete old cached items")
    }

    fn publish_xml(
        &self,
        channel: &ChannelMeta,
        items: &[CachedItem],
    ) -> Result<String, RenderError> {
        render_rss(channel, items)
    }
}

/// Follow at most 3 redirects and stop on loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            "Following redirect"
        );
        attempt.follow()
    })
}

// ============================================================================
// Tests
// ============================================================================
