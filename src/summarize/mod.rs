//! AI summarization of cached feed items.
//!
//! The [`Summarizer`] trait is the seam between the feed client and a
//! generative model backend; [`GeminiClient`] is the production backend.

mod gemini;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiClient, DEFAULT_GEMINI_BASE_URL};

/// Input text beyond this many characters is cut before prompting
const MAX_INPUT_CHARS: usize = 100_000;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("No API key configured")]
    MissingApiKey,
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Model returned no text")]
    EmptyResponse,
    #[error("Every configured model failed, last error: {0}")]
    AllModelsFailed(String),
}

/// What to summarize and in which language.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub title: &'a str,
    pub url: Option<&'a str>,
    /// Scraped article text, or the feed-provided body when scraping was unavailable
    pub text: &'a str,
    pub language: &'a str,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize with one specific model; model fallback is the caller's job.
    async fn summarize(
        &self,
        model: &str,
        request: &SummaryRequest<'_>,
    ) -> Result<String, SummarizeError>;
}

/// Build the prompt sent to the model.
pub fn build_prompt(request: &SummaryRequest<'_>) -> String {
    let text: String = request.text.chars().take(MAX_INPUT_CHARS).collect();
    let source = request
        .url
        .map(|url| format!("Source URL: {url}\n"))
        .unwrap_or_default();

    format!(
        "Summarize the following article in {language}. \
         Reply with the summary only, in plain text, no longer than a few short paragraphs.\n\n\
         Title: {title}\n{source}\n{text}",
        language = request.language,
        title = request.title,
    )
}
