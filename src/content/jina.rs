use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::policy::{UrlPolicy, FALLBACK_SELECTOR};
use super::{ContentError, ScrapeSession, SessionFactory};

pub const DEFAULT_JINA_BASE_URL: &str = "https://r.jina.ai";

const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_RETRIES: u32 = 3;

type Resolver = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Scrape session backed by the Jina Reader API.
///
/// The reader renders the page server-side and returns the text found under
/// the `X-Target-Selector` element. Which URL is requested and which selector
/// is sent are decided per article by the installed resolvers.
pub struct JinaSession {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<Arc<SecretString>>,
    timeout: Duration,
    rewrite_url: Resolver,
    resolve_selector: Resolver,
    scraped: AtomicUsize,
}

impl JinaSession {
    /// Open a session against `base_url`.
    ///
    /// # Errors
    ///
    /// [`ContentError::InsecureBaseUrl`] unless the base is HTTPS or a
    /// localhost HTTP endpoint; [`ContentError::Network`] if the HTTP client
    /// cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<Arc<SecretString>>,
        timeout: Duration,
    ) -> Result<Self, ContentError> {
        // API keys must never travel in clear text
        if !base_url.starts_with("https://") {
            let is_localhost = base_url.starts_with("http://127.0.0.1")
                || base_url.starts_with("http://localhost");
            if !is_localhost {
                return Err(ContentError::InsecureBaseUrl);
            }
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            rewrite_url: Box::new(|url| url.to_string()),
            resolve_selector: Box::new(|_| FALLBACK_SELECTOR.to_string()),
            scraped: AtomicUsize::new(0),
        })
    }

    pub fn set_url_rewriter(&mut self, rewriter: impl Fn(&str) -> String + Send + Sync + 'static) {
        self.rewrite_url = Box::new(rewriter);
    }

    pub fn set_selector_resolver(
        &mut self,
        resolver: impl Fn(&str) -> String + Send + Sync + 'static,
    ) {
        self.resolve_selector = Box::new(resolver);
    }

    /// Retry transient failures with exponential backoff: 1s, 2s, 4s.
    async fn fetch_with_retry(
        &self,
        reader_url: &str,
        selector: &str,
    ) -> Result<String, ContentError> {
        let mut retry_count = 0;

        loop {
            match self.fetch_once(reader_url, selector).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    let delay = 1u64 << retry_count;
                    tracing::debug!(
                        error = %e,
                        retry = retry_count + 1,
                        delay_secs = delay,
                        "Retrying scrape after transient error"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, reader_url: &str, selector: &str) -> Result<String, ContentError> {
        let mut request = self
            .client
            .get(reader_url)
            .header("X-Target-Selector", selector);

        // Only the official endpoint gets the key
        if let Some(key) = &self.api_key {
            if self.base_url == DEFAULT_JINA_BASE_URL {
                request =
                    request.header("Authorization", format!("Bearer {}", key.expose_secret()));
            }
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ContentError::Timeout)??;

        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status().as_u16()));
        }

        tokio::time::timeout(self.timeout, read_limited_text(response, MAX_CONTENT_SIZE))
            .await
            .map_err(|_| ContentError::Timeout)?
    }
}

#[async_trait]
impl ScrapeSession for JinaSession {
    async fn scrape(&self, url: &str) -> Result<String, ContentError> {
        let target = (self.rewrite_url)(url);
        let selector = (self.resolve_selector)(url);

        let parsed = Url::parse(&target).map_err(|_| ContentError::InvalidUrl)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ContentError::InvalidUrl);
        }

        let reader_url = format!("{}/{}", self.base_url, parsed.as_str());
        tracing::debug!(url = %url, target = %target, selector = %selector, "Scraping article");

        let content = self.fetch_with_retry(&reader_url, &selector).await?;
        self.scraped.fetch_add(1, Ordering::Relaxed);
        Ok(strip_boilerplate(&content))
    }

    async fn close(self: Box<Self>) -> Result<(), ContentError> {
        tracing::debug!(
            pages = self.scraped.load(Ordering::Relaxed),
            "Closing scrape session"
        );
        Ok(())
    }
}

/// Builds [`JinaSession`]s wired to a [`UrlPolicy`].
pub struct JinaSessionFactory {
    base_url: String,
    api_key: Option<Arc<SecretString>>,
    timeout: Duration,
    policy: Arc<UrlPolicy>,
}

impl JinaSessionFactory {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
        policy: Arc<UrlPolicy>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.map(Arc::new),
            timeout,
            policy,
        }
    }
}

impl SessionFactory for JinaSessionFactory {
    fn new_session(&self) -> Option<Box<dyn ScrapeSession>> {
        match JinaSession::new(&self.base_url, self.api_key.clone(), self.timeout) {
            Ok(mut session) => {
                let policy = Arc::clone(&self.policy);
                session.set_url_rewriter(move |url| policy.resolve_url(url));
                let policy = Arc::clone(&self.policy);
                session.set_selector_resolver(move |url| policy.resolve_selector(url));
                Some(Box::new(session))
            }
            Err(e) => {
                tracing::warn!(
                    base_url = %self.base_url,
                    error = %e,
                    "Failed to create scrape session, summarizing without scraping"
                );
                None
            }
        }
    }
}

/// Drop navigation and comment scaffolding lines the reader leaves in.
fn strip_boilerplate(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !(trimmed.starts_with("[Skip to content]")
                || trimmed == "Loading Comments..."
                || trimmed == "Write a Comment..."
                || trimmed.starts_with("Email (Required)")
                || trimmed.contains("Proudly powered by WordPress")
                || trimmed == "Menu")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ContentError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ContentError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| ContentError::InvalidUtf8)
}
