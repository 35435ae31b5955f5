//! Configuration file parser.
//!
//! The file is JSON; `//` and `/* */` comments and trailing commas are
//! tolerated. Loading produces a fully-resolved [`Config`]: every default is
//! applied here, so nothing downstream deals with unset fields.
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::content::DEFAULT_JINA_BASE_URL;
use crate::render::ChannelMeta;
use crate::server::serve_route;

pub const DEFAULT_GOOGLE_AI_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_DESIRED_LANGUAGE: &str = "English";
pub const DEFAULT_FETCH_INTERVAL_SECONDS: u64 = 60 * 3;
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_CACHE_RETENTION_DAYS: u64 = 7;

/// Upper bound for the fetch interval and timeout: one year
pub const MAX_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub const DEFAULT_PUBLISH_TITLE: &str = "Published RSS Feeds";
pub const DEFAULT_PUBLISH_LINK: &str = "https://github.com/meinside";
pub const DEFAULT_PUBLISH_DESCRIPTION: &str =
    "Published RSS Feeds, summarized with Google Gemini API";
pub const DEFAULT_PUBLISH_AUTHOR: &str = "summarized-rss-feeds";
pub const DEFAULT_PUBLISH_EMAIL: &str = "noreply@no-such-domain.com";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Two feed groups would share read/unread state
    #[error("Feeds '{first}' and '{second}' share cache file '{cache_filename}'")]
    DuplicateCacheFile {
        cache_filename: String,
        first: String,
        second: String,
    },

    #[error("Feeds '{first}' and '{second}' are both served at '{route}'")]
    DuplicateServePath {
        route: String,
        first: String,
        second: String,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Fully-resolved, immutable application configuration.
///
/// Debug output masks every API key.
pub struct Config {
    /// Google AI key pool; the single-key field comes first
    pub api_keys: Vec<SecretString>,
    /// Models tried in order until one succeeds
    pub models: Vec<String>,
    pub db_files_dir: PathBuf,
    pub desired_language: String,
    pub verbose: bool,
    pub feeds: Vec<FeedGroupConfig>,
    pub fetch_interval: Duration,
    pub fetch_timeout: Duration,
    /// Empty means every user agent is allowed
    pub permitted_user_agents: Vec<String>,
    pub server_port: u16,
    /// Jina Reader key; the `JINA_API_KEY` env var takes precedence
    pub jina_api_key: Option<SecretString>,
    pub scraper_base_url: String,
    /// Read items older than this are evicted
    pub cache_retention: Duration,
}

/// One feed group: its sources, its cache and its published endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedGroupConfig {
    pub name: String,
    pub cache_filename: String,
    pub serve_path: String,
    pub feed_urls: Vec<String>,
    pub publish: ChannelMeta,
    pub drop_items_with_failed_summaries: bool,
}

impl FeedGroupConfig {
    pub fn cache_path(&self, db_files_dir: &Path) -> PathBuf {
        db_files_dir.join(&self.cache_filename)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_keys", &format!("[REDACTED; {}]", self.api_keys.len()))
            .field("models", &self.models)
            .field("db_files_dir", &self.db_files_dir)
            .field("desired_language", &self.desired_language)
            .field("verbose", &self.verbose)
            .field("feeds", &self.feeds)
            .field("fetch_interval", &self.fetch_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("permitted_user_agents", &self.permitted_user_agents)
            .field("server_port", &self.server_port)
            .field(
                "jina_api_key",
                &self.jina_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scraper_base_url", &self.scraper_base_url)
            .field("cache_retention", &self.cache_retention)
            .finish()
    }
}

// ============================================================================
// File Format
// ============================================================================

#[derive(Deserialize)]
struct RawConfig {
    google_ai_api_key: Option<String>,
    #[serde(default)]
    google_ai_api_keys: Vec<String>,
    #[serde(default)]
    google_ai_models: Vec<String>,
    #[serde(default)]
    db_files_dir: String,
    desired_language: Option<String>,
    #[serde(default)]
    verbose: bool,

    #[serde(default)]
    rss_feeds: Vec<RawFeedGroup>,
    #[serde(default)]
    fetch_feeds_interval_seconds: i64,
    #[serde(default)]
    fetch_feeds_timeout_seconds: i64,
    #[serde(default)]
    permitted_user_agents: Vec<String>,

    #[serde(default)]
    rss_server_port: u16,

    jina_api_key: Option<String>,
    scraper_base_url: Option<String>,
    #[serde(default)]
    cache_retention_days: i64,
}

#[derive(Deserialize)]
struct RawFeedGroup {
    name: String,
    cache_filename: String,
    serve_path: String,
    #[serde(default)]
    feed_urls: Vec<String>,

    publish_title: Option<String>,
    publish_link: Option<String>,
    publish_description: Option<String>,
    publish_author: Option<String>,
    publish_email: Option<String>,

    #[serde(default)]
    drop_items_with_failed_summaries: bool,
}

impl Config {
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load and resolve the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        Ok(config)
    }

    /// Parse and resolve configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(&standardize_json(content))?;
        let config = Self::resolve(raw, std::env::var("JINA_API_KEY").ok());
        config.validate()?;
        Ok(config)
    }

    fn resolve(raw: RawConfig, jina_env_key: Option<String>) -> Self {
        let mut keys: Vec<String> = Vec::new();
        for key in raw.google_ai_api_key.into_iter().chain(raw.google_ai_api_keys) {
            let key = key.trim().to_string();
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }

        let models = if raw.google_ai_models.is_empty() {
            vec![DEFAULT_GOOGLE_AI_MODEL.to_string()]
        } else {
            raw.google_ai_models
        };

        let feeds = raw
            .rss_feeds
            .into_iter()
            .map(|feed| FeedGroupConfig {
                name: feed.name,
                cache_filename: feed.cache_filename,
                serve_path: feed.serve_path,
                feed_urls: feed.feed_urls,
                publish: ChannelMeta {
                    title: feed
                        .publish_title
                        .unwrap_or_else(|| DEFAULT_PUBLISH_TITLE.to_string()),
                    link: feed
                        .publish_link
                        .unwrap_or_else(|| DEFAULT_PUBLISH_LINK.to_string()),
                    description: feed
                        .publish_description
                        .unwrap_or_else(|| DEFAULT_PUBLISH_DESCRIPTION.to_string()),
                    author: feed
                        .publish_author
                        .unwrap_or_else(|| DEFAULT_PUBLISH_AUTHOR.to_string()),
                    email: feed
                        .publish_email
                        .unwrap_or_else(|| DEFAULT_PUBLISH_EMAIL.to_string()),
                },
                drop_items_with_failed_summaries: feed.drop_items_with_failed_summaries,
            })
            .collect();

        Self {
            api_keys: keys.into_iter().map(SecretString::from).collect(),
            models,
            db_files_dir: PathBuf::from(raw.db_files_dir),
            desired_language: raw
                .desired_language
                .unwrap_or_else(|| DEFAULT_DESIRED_LANGUAGE.to_string()),
            verbose: raw.verbose,
            feeds,
            fetch_interval: Duration::from_secs(
                positive_or(raw.fetch_feeds_interval_seconds, DEFAULT_FETCH_INTERVAL_SECONDS)
                    .min(MAX_DURATION_SECONDS),
            ),
            fetch_timeout: Duration::from_secs(
                positive_or(raw.fetch_feeds_timeout_seconds, DEFAULT_FETCH_TIMEOUT_SECONDS)
                    .min(MAX_DURATION_SECONDS),
            ),
            permitted_user_agents: raw.permitted_user_agents,
            server_port: raw.rss_server_port,
            jina_api_key: jina_env_key
                .or(raw.jina_api_key)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            scraper_base_url: raw
                .scraper_base_url
                .unwrap_or_else(|| DEFAULT_JINA_BASE_URL.to_string()),
            cache_retention: Duration::from_secs(
                positive_or(raw.cache_retention_days, DEFAULT_CACHE_RETENTION_DAYS)
                    .saturating_mul(SECONDS_PER_DAY),
            ),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let cache_paths: Vec<PathBuf> = self
            .feeds
            .iter()
            .map(|feed| normalize_path(&feed.cache_path(&self.db_files_dir)))
            .collect();
        for (i, feed) in self.feeds.iter().enumerate() {
            for (j, other) in self.feeds[..i].iter().enumerate() {
                if cache_paths[j] == cache_paths[i] {
                    return Err(ConfigError::DuplicateCacheFile {
                        cache_filename: feed.cache_filename.clone(),
                        first: other.name.clone(),
                        second: feed.name.clone(),
                    });
                }
            }
        }

        let mut routes: HashSet<String> = HashSet::new();
        for (i, feed) in self.feeds.iter().enumerate() {
            let route = serve_route(&feed.serve_path);
            if !routes.insert(route.clone()) {
                let first = self.feeds[..i]
                    .iter()
                    .find(|f| serve_route(&f.serve_path) == route)
                    .map(|f| f.name.clone())
                    .unwrap_or_default();
                return Err(ConfigError::DuplicateServePath {
                    route,
                    first,
                    second: feed.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Lexical cleanup so `a.db`, `./a.db` and `x/../a.db` compare equal.
/// Symlinks are not resolved; the files may not exist yet.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn positive_or(value: i64, default: u64) -> u64 {
    if value > 0 {
        value as u64
    } else {
        default
    }
}

/// Strip comments and trailing commas so `serde_json` accepts the text.
///
/// String literals (including escaped quotes) pass through untouched.
pub fn standardize_json(input: &str) -> String {
    let mut without_comments = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            without_comments.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        without_comments.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                without_comments.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        without_comments.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                without_comments.push(' ');
            }
            _ => without_comments.push(c),
        }
    }

    // Second pass: drop commas that directly precede a closing bracket
    let chars: Vec<char> = without_comments.chars().collect();
    let mut output = String::with_capacity(chars.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            output.push(c);
            if c == '\\' {
                if let Some(&escaped) = chars.get(i + 1) {
                    output.push(escaped);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            output.push(c);
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if !matches!(next, Some('}') | Some(']')) {
                output.push(c);
            }
        } else {
            output.push(c);
        }
        i += 1;
    }

    output
}

// ============================================================================
// Tests
// ============================================================================
