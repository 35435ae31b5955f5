//! Full-article scraping used to enrich feed items before summarization.
//!
//! - [`policy`] - per-site URL rewrites and content selectors
//! - [`jina`] - scrape sessions backed by the Jina Reader API
//!
//! A [`ScrapeSession`] lives for one enrichment step: the pipeline asks a
//! [`SessionFactory`] for one, hands it to the feed client, and closes it
//! when the step ends. A factory that cannot build a session returns `None`
//! and enrichment carries on from feed-provided text.

mod jina;
pub mod policy;

use async_trait::async_trait;
use thiserror::Error;

pub use jina::{JinaSession, JinaSessionFactory, DEFAULT_JINA_BASE_URL};
pub use policy::UrlPolicy;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl ContentError {
    /// Returns true if this error is transient and the request should be retried.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            ContentError::Timeout | ContentError::Network(_) => true,
            ContentError::HttpStatus(status) => *status >= 500,
            ContentError::ResponseTooLarge(_)
            | ContentError::InvalidUtf8
            | ContentError::InvalidUrl
            | ContentError::InsecureBaseUrl => false,
        }
    }
}

/// An open scraping capability, scoped to one enrichment step.
#[async_trait]
pub trait ScrapeSession: Send + Sync {
    /// Extract the readable text of the article at `url`.
    async fn scrape(&self, url: &str) -> Result<String, ContentError>;

    /// Release the session. Consumes it, so a session closes at most once.
    async fn close(self: Box<Self>) -> Result<(), ContentError>;
}

pub trait SessionFactory: Send + Sync {
    /// Open a new session, or `None` when scraping is unavailable.
    fn new_session(&self) -> Option<Box<dyn ScrapeSession>>;
}
