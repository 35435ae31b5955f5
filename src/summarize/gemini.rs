use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{build_prompt, SummarizeError, Summarizer, SummaryRequest};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini `generateContent` client.
///
/// Holds a pool of API keys and hands them out round-robin, one per request,
/// to spread quota across keys.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_keys: Arc<[SecretString]>,
    next_key: AtomicUsize,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        api_keys: Arc<[SecretString]>,
        timeout: Duration,
    ) -> Result<Self, SummarizeError> {
        if api_keys.is_empty() {
            return Err(SummarizeError::MissingApiKey);
        }

        Ok(Self {
            http,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            api_keys,
            next_key: AtomicUsize::new(0),
            timeout,
        })
    }

    /// Point the client at another endpoint (mock servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn pick_key(&self) -> &SecretString {
        let index = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        &self.api_keys[index]
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn summarize(
        &self,
        model: &str,
        request: &SummaryRequest<'_>,
    ) -> Result<String, SummarizeError> {
        let prompt = build_prompt(request);
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: &prompt }],
            }],
        };
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);

        let response = tokio::time::timeout(
            self.timeout,
            self.http
                .post(&url)
                .header("x-goog-api-key", self.pick_key().expose_secret())
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| SummarizeError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout(self.timeout, response.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            return Err(SummarizeError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: GenerateResponse = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| SummarizeError::Timeout)??;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }

        tracing::debug!(model = %model, title = %request.title, "Summarized item");
        Ok(text.to_string())
    }
}
