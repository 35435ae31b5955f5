//! Per-site URL rewriting and content-selector resolution for scraping.
//!
//! Rules live in an ordered table owned by [`UrlPolicy`]; the first matching
//! rule wins. Rewrite rules and selector rules are evaluated independently,
//! so one URL can be both rewritten and given a custom selector.

/// Selector meaning "the whole document body"
pub const FALLBACK_SELECTOR: &str = "body";

/// Bypass service that renders paywalled articles
const PAYWALL_BYPASS_PREFIX: &str = "https://www.paywallskip.com/article?url=";

const PAYWALLED_SITES: &[&str] = &[
    "https://www.nytimes.com/",
    "https://www.wsj.com/",
    "https://www.washingtonpost.com/",
    "https://www.economist.com/",
    "https://www.ft.com/",
    "https://www.theguardian.com/",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Replace every occurrence of `from` with `to`
    ReplaceHost { from: String, to: String },
    /// Prepend a prefix to the whole URL
    WrapWith(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    /// URL prefixes this rule applies to
    pub prefixes: Vec<String>,
    pub rewrite: Rewrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorRule {
    pub prefixes: Vec<String>,
    pub selector: String,
}

impl RewriteRule {
    fn matches(&self, url: &str) -> bool {
        self.prefixes.iter().any(|p| url.starts_with(p.as_str()))
    }

    fn apply(&self, url: &str) -> String {
        match &self.rewrite {
            Rewrite::ReplaceHost { from, to } => url.replace(from.as_str(), to),
            Rewrite::WrapWith(prefix) => format!("{prefix}{url}"),
        }
    }
}

impl SelectorRule {
    fn matches(&self, url: &str) -> bool {
        self.prefixes.iter().any(|p| url.starts_with(p.as_str()))
    }
}

/// Decides how an article URL is fetched and which DOM region is extracted.
///
/// Stateless once built; safe to share across pipelines behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPolicy {
    rewrites: Vec<RewriteRule>,
    selectors: Vec<SelectorRule>,
    fallback_selector: String,
}

impl UrlPolicy {
    pub fn new(rewrites: Vec<RewriteRule>, selectors: Vec<SelectorRule>) -> Self {
        Self {
            rewrites,
            selectors,
            fallback_selector: FALLBACK_SELECTOR.to_string(),
        }
    }

    pub fn with_fallback_selector(mut self, selector: impl Into<String>) -> Self {
        self.fallback_selector = selector.into();
        self
    }

    /// Rewritten URL per the first matching rule, or `url` unchanged.
    pub fn resolve_url(&self, url: &str) -> String {
        self.rewrites
            .iter()
            .find(|rule| rule.matches(url))
            .map(|rule| rule.apply(url))
            .unwrap_or_else(|| url.to_string())
    }

    /// Selector of the first matching rule, or the fallback selector.
    pub fn resolve_selector(&self, url: &str) -> String {
        self.selectors
            .iter()
            .find(|rule| rule.matches(url))
            .map(|rule| rule.selector.clone())
            .unwrap_or_else(|| self.fallback_selector.clone())
    }
}

impl Default for UrlPolicy {
    fn default() -> Self {
        let rewrites = vec![
            RewriteRule {
                prefixes: vec!["https://www.reddit.com/".to_string()],
                rewrite: Rewrite::ReplaceHost {
                    from: "www.reddit.com".to_string(),
                    to: "old.reddit.com".to_string(),
                },
            },
            RewriteRule {
                prefixes: PAYWALLED_SITES.iter().map(|s| s.to_string()).collect(),
                rewrite: Rewrite::WrapWith(PAYWALL_BYPASS_PREFIX.to_string()),
            },
        ];
        let selectors = vec![SelectorRule {
            prefixes: vec!["https://x.com/".to_string()],
            selector: r#"div[data-testid="tweetText"]"#.to_string(),
        }];

        Self::new(rewrites, selectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_reddit_uses_old_reddit() {
        let policy = UrlPolicy::default();
        assert_eq!(
            policy.resolve_url("https://www.reddit.com/r/test/1"),
            "https://old.reddit.com/r/test/1"
        );
    }

    #[test]
    fn test_paywalled_site_wrapped() {
        let policy = UrlPolicy::default();
        assert_eq!(
            policy.resolve_url("https://www.ft.com/content/abc"),
            "https://www.paywallskip.com/article?url=https://www.ft.com/content/abc"
        );
    }

    #[test]
    fn test_x_selector() {
        let policy = UrlPolicy::default();
        assert_eq!(
            policy.resolve_selector("https://x.com/user/status/1"),
            r#"div[data-testid="tweetText"]"#
        );
        // Selector-only rule: no URL rewrite
        assert_eq!(
            policy.resolve_url("https://x.com/user/status/1"),
            "https://x.com/user/status/1"
        );
    }

    #[test]
    fn test_unknown_site_falls_through() {
        let policy = UrlPolicy::default();
        assert_eq!(
            policy.resolve_url("https://unknown.example/a"),
            "https://unknown.example/a"
        );
        assert_eq!(policy.resolve_selector("https://unknown.example/a"), "body");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let policy = UrlPolicy::new(
            vec![
                RewriteRule {
                    prefixes: vec!["https://a.example/".to_string()],
                    rewrite: Rewrite::WrapWith("first:".to_string()),
                },
                RewriteRule {
                    prefixes: vec!["https://a.example/".to_string()],
                    rewrite: Rewrite::WrapWith("second:".to_string()),
                },
            ],
            vec![],
        );
        assert_eq!(
            policy.resolve_url("https://a.example/x"),
            "first:https://a.example/x"
        );
    }

    #[test]
    fn test_rewrite_and_selector_apply_together() {
        let policy = UrlPolicy::new(
            vec![RewriteRule {
                prefixes: vec!["https://social.example/".to_string()],
                rewrite: Rewrite::ReplaceHost {
                    from: "social.example".to_string(),
                    to: "mirror.example".to_string(),
                },
            }],
            vec![SelectorRule {
                prefixes: vec!["https://social.example/".to_string()],
                selector: "article".to_string(),
            }],
        )
        .with_fallback_selector("main");

        let url = "https://social.example/post/9";
        assert_eq!(policy.resolve_url(url), "https://mirror.example/post/9");
        assert_eq!(policy.resolve_selector(url), "article");
        assert_eq!(policy.resolve_selector("https://other.example/"), "main");
    }

    #[test]
    fn test_empty_rule_table_is_identity() {
        let policy = UrlPolicy::new(vec![], vec![]);
        assert_eq!(policy.resolve_url("https://www.reddit.com/r/a"), "https://www.reddit.com/r/a");
        assert_eq!(policy.resolve_selector("https://x.com/a"), FALLBACK_SELECTOR);
    }

    proptest! {
        #[test]
        fn prop_unmatched_urls_unchanged(path in "[a-z0-9/]{0,40}") {
            let policy = UrlPolicy::default();
            let url = format!("https://unmatched.example/{}", path);
            prop_assert_eq!(policy.resolve_url(&url), url.clone());
            prop_assert_eq!(policy.resolve_selector(&url), FALLBACK_SELECTOR);
        }

        #[test]
        fn prop_paywalled_urls_wrapped(
            site in 0usize..PAYWALLED_SITES.len(),
            path in "[a-z0-9/-]{0,40}",
        ) {
            let policy = UrlPolicy::default();
            let url = format!("{}{}", PAYWALLED_SITES[site], path);
            prop_assert_eq!(policy.resolve_url(&url), format!("{}{}", PAYWALL_BYPASS_PREFIX, url));
        }
    }
}
