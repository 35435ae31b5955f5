//! HTTP publisher: one RSS endpoint per feed group.
//!
//! - [`access`] - user-agent allowlist
//!
//! Every request re-reads the group's cache (read items included) and
//! renders a fresh document. Failures never produce partial XML.

pub mod access;

use anyhow::Context;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::pipeline::FeedGroup;
use access::authorized;

pub const RSS_CONTENT_TYPE: &str = "application/rss+xml";
const CACHE_CONTROL_VALUE: &str = "max-age=60";

#[derive(Clone)]
struct RouteState {
    group: Arc<FeedGroup>,
    allowlist: Arc<[String]>,
}

/// Normalize a configured serve path into a route.
///
/// The path is joined under `/` and cleaned lexically: empty and `.`
/// segments are dropped, `..` removes the previous segment, and there is
/// no trailing slash.
pub fn serve_route(serve_path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in serve_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Build the publisher router: one `GET` route per group.
///
/// A group whose route is already taken, or cannot be expressed as a
/// literal route, is skipped with a warning.
pub fn router(groups: &[Arc<FeedGroup>], allowlist: Arc<[String]>) -> Router {
    let mut router = Router::new();
    let mut taken: HashSet<String> = HashSet::new();

    for group in groups {
        let route = serve_route(&group.config.serve_path);

        if !is_literal_route(&route) {
            tracing::warn!(
                group = %group.name(),
                route = %route,
                "Serve path is not a literal route, skipping"
            );
            continue;
        }
        if !taken.insert(route.clone()) {
            tracing::warn!(
                group = %group.name(),
                route = %route,
                "Serve path already in use, skipping"
            );
            continue;
        }

        let state = RouteState {
            group: Arc::clone(group),
            allowlist: Arc::clone(&allowlist),
        };
        router = router.route(
            &route,
            get(move |headers: HeaderMap| async move { publish(&state, &headers).await }),
        );
        tracing::info!(group = %group.name(), route = %route, "Publishing feed");
    }

    router
}

/// Bind `0.0.0.0:<port>` and serve until the listener fails.
pub async fn serve(port: u16, router: Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    serve_with_listener(listener, router).await
}

/// Serve on an already-bound listener.
pub async fn serve_with_listener(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    tracing::info!(addr = %addr, "RSS server listening");
    axum::serve(listener, router)
        .await
        .context("RSS server stopped")
}

async fn publish(state: &RouteState, headers: &HeaderMap) -> Response {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !authorized(user_agent, &state.allowlist) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let group = &state.group;
    let items = match group.client.list_cached_items(true).await {
        Ok(items) => items,
        Err(e) => {
            tracing::error!(group = %group.name(), error = %e, "Failed to read cached items");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match group.client.publish_xml(&group.config.publish, &items) {
        Ok(xml) => {
            tracing::debug!(group = %group.name(), items = items.len(), "Served feed");
            (
                [(CONTENT_TYPE, RSS_CONTENT_TYPE), (CACHE_CONTROL, CACHE_CONTROL_VALUE)],
                xml,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(group = %group.name(), error = %e, "Failed to render feed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Axum treats `{..}`, `:x` and `*x` segments as captures.
fn is_literal_route(route: &str) -> bool {
    !route.contains(['{', '}'])
        && !route
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, EnrichError, EnrichSummary, FeedBackend};
    use crate::config::FeedGroupConfig;
    use crate::content::ScrapeSession;
    use crate::feed::FeedDocument;
    use crate::render::{render_rss, ChannelMeta, RenderError};
    use crate::storage::CachedItem;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct StaticBackend {
        items: Vec<CachedItem>,
        fail_list: bool,
    }

    #[async_trait]
    impl FeedBackend for StaticBackend {
        async fn fetch_feeds(&self, _: bool) -> Result<Vec<FeedDocument>, ClientError> {
            Ok(Vec::new())
        }

        async fn summarize_and_cache(
            &self,
            _: &[FeedDocument],
            _: Option<&dyn ScrapeSession>,
        ) -> Result<EnrichSummary, EnrichError> {
            Ok(EnrichSummary::default())
        }

        async fn list_cached_items(&self, include_read: bool) -> anyhow::Result<Vec<CachedItem>> {
            if self.fail_list {
                anyhow::bail!("cache unavailable");
            }
            assert!(include_read, "publisher must include read items");
            Ok(self.items.clone())
        }

        async fn mark_as_read(&self, _: &[CachedItem]) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn delete_old_cached_items(&self) -> anyhow::Result<u64> {
            Ok(0)
        }

        fn publish_xml(
            &self,
            channel: &ChannelMeta,
            items: &[CachedItem],
        ) -> Result<String, RenderError> {
            render_rss(channel, items)
        }
    }

    fn item(id: i64, read: bool) -> CachedItem {
        CachedItem {
            id,
            guid: format!("g{id}"),
            title: format!("Item {id}"),
            link: Some(format!("https://example.com/{id}")),
            description: None,
            author: None,
            published: Some(1704067200),
            summary: Some(format!("Summary {id}")),
            summary_error: None,
            read,
            cached_at: 1704067200,
        }
    }

    fn group(name: &str, serve_path: &str, backend: StaticBackend) -> Arc<FeedGroup> {
        Arc::new(FeedGroup {
            config: FeedGroupConfig {
                name: name.to_string(),
                cache_filename: format!("{name}.db"),
                serve_path: serve_path.to_string(),
                feed_urls: vec!["https://example.com/feed".to_string()],
                publish: ChannelMeta {
                    title: format!("{name} feed"),
                    link: "https://example.com".to_string(),
                    description: "d".to_string(),
                    author: "a".to_string(),
                    email: "e@example.com".to_string(),
                },
                drop_items_with_failed_summaries: false,
            },
            client: Box::new(backend),
        })
    }

    async fn spawn(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_with_listener(listener, router));
        format!("http://{addr}")
    }

    fn allow(entries: &[&str]) -> Arc<[String]> {
        entries.iter().map(|s| s.to_string()).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_serve_route_normalization() {
        assert_eq!(serve_route("rss"), "/rss");
        assert_eq!(serve_route("/rss/tech/"), "/rss/tech");
        assert_eq!(serve_route("//rss//tech"), "/rss/tech");
        assert_eq!(serve_route("/rss/./a/../b"), "/rss/b");
        assert_eq!(serve_route("../../etc"), "/etc");
        assert_eq!(serve_route(""), "/");
    }

    #[test]
    fn test_literal_route_check() {
        assert!(is_literal_route("/rss/tech"));
        assert!(!is_literal_route("/rss/{id}"));
        assert!(!is_literal_route("/rss/:id"));
        assert!(!is_literal_route("/rss/*rest"));
    }

    #[tokio::test]
    async fn test_serves_all_items_with_headers() {
        let backend = StaticBackend {
            items: vec![item(1, true), item(2, false)],
            fail_list: false,
        };
        let base = spawn(router(&[group("tech", "rss/tech/", backend)], allow(&[]))).await;

        let response = reqwest::get(format!("{base}/rss/tech")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[CONTENT_TYPE.as_str()], RSS_CONTENT_TYPE);
        assert_eq!(response.headers()[CACHE_CONTROL.as_str()], "max-age=60");

        let body = response.text().await.unwrap();
        assert!(body.contains("<title>tech feed</title>"));
        assert_eq!(body.matches("<item>").count(), 2);
    }

    #[tokio::test]
    async fn test_rejects_unpermitted_agent() {
        let backend = StaticBackend {
            items: vec![item(1, false)],
            fail_list: false,
        };
        let base = spawn(router(&[group("tech", "/tech", backend)], allow(&["GoodBot"]))).await;
        let client = reqwest::Client::new();

        let rejected = client
            .get(format!("{base}/tech"))
            .header("User-Agent", "BadBot/1.0")
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), 401);
        assert!(rejected.text().await.unwrap().is_empty());

        let admitted = client
            .get(format!("{base}/tech"))
            .header("User-Agent", "GoodBot/2.0")
            .send()
            .await
            .unwrap();
        assert_eq!(admitted.status(), 200);
    }

    #[tokio::test]
    async fn test_cache_failure_is_500_without_body() {
        let backend = StaticBackend {
            items: Vec::new(),
            fail_list: true,
        };
        let base = spawn(router(&[group("tech", "/tech", backend)], allow(&[]))).await;

        let response = reqwest::get(format!("{base}/tech")).await.unwrap();
        assert_eq!(response.status(), 500);
        assert!(response.text().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_groups_served_independently() {
        let groups = [
            group("a", "/a", StaticBackend { items: vec![item(1, false)], fail_list: false }),
            group("b", "/b", StaticBackend { items: Vec::new(), fail_list: false }),
            // Same route as "a" after normalization; skipped
            group("dup", "a/", StaticBackend { items: Vec::new(), fail_list: true }),
        ];
        let base = spawn(router(&groups, allow(&[]))).await;

        let a = reqwest::get(format!("{base}/a")).await.unwrap();
        assert_eq!(a.status(), 200);
        assert_eq!(a.text().await.unwrap().matches("<item>").count(), 1);

        let b = reqwest::get(format!("{base}/b")).await.unwrap();
        assert_eq!(b.text().await.unwrap().matches("<item>").count(), 0);

        let missing = reqwest::get(format!("{base}/c")).await.unwrap();
        assert_eq!(missing.status(), 404);
    }
}
