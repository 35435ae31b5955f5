//! End-to-end tests: one pipeline cycle against mocked upstreams, then the
//! published feed read back over HTTP.
//!
//! Every test uses its own mock server and in-memory cache.

use rss_relay::client::{ClientOptions, FeedBackend, FeedClient};
use rss_relay::config::FeedGroupConfig;
use rss_relay::content::{JinaSessionFactory, SessionFactory, UrlPolicy};
use rss_relay::pipeline::{FeedGroup, FeedPipeline};
use rss_relay::render::ChannelMeta;
use rss_relay::server::{router, serve_with_listener};
use secrecy::SecretString;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TWO_ITEM_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
<title>Example</title>
<link>https://example.com</link>
<description>d</description>
<item><title>Good</title>
<link>https://example.com/1</link>
<guid>item-1</guid><description>First body</description></item>
<item><title>Broken</title>
<link>https://example.com/2</link>
<guid>item-2</guid><description>Second body</description></item>
</channel></rss>"#;

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

/// Mount the upstream feed, the reader endpoint and a working model.
async fn upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEM_FEED))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"example\.com/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Full article text"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1beta/models/.+:generateContent$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("Model summary")))
        .mount(&server)
        .await;
    server
}

fn group_config(drop_failed: bool) -> FeedGroupConfig {
    FeedGroupConfig {
        name: "example".to_string(),
        cache_filename: "example.db".to_string(),
        serve_path: "/rss/example".to_string(),
        feed_urls: Vec::new(),
        publish: ChannelMeta {
            title: "Published RSS Feeds".to_string(),
            link: "https://github.com/meinside".to_string(),
            description: "Summaries".to_string(),
            author: "summarized-rss-feeds".to_string(),
            email: "noreply@no-such-domain.com".to_string(),
        },
        drop_items_with_failed_summaries: drop_failed,
    }
}

async fn feed_group(server: &MockServer, drop_failed: bool) -> Arc<FeedGroup> {
    let mut config = group_config(drop_failed);
    config.feed_urls = vec![format!("{}/feed.xml", server.uri())];

    let keys: Arc<[SecretString]> = vec![SecretString::from("test-key".to_string())].into();
    let client = FeedClient::new(
        keys,
        config.feed_urls.clone(),
        Path::new(":memory:"),
        ClientOptions {
            fetch_timeout: Duration::from_secs(5),
            drop_failed_summaries: drop_failed,
            gemini_base_url: server.uri(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    Arc::new(FeedGroup {
        config,
        client: Box::new(client),
    })
}

fn pipeline(server: &MockServer, group: &Arc<FeedGroup>) -> FeedPipeline {
    let sessions: Arc<dyn SessionFactory> = Arc::new(JinaSessionFactory::new(
        server.uri(),
        None,
        Duration::from_secs(5),
        Arc::new(UrlPolicy::default()),
    ));
    FeedPipeline::new(Arc::clone(group), sessions, Duration::from_secs(180))
}

async fn publish(groups: &[Arc<FeedGroup>], allowlist: &[&str]) -> String {
    let allowlist: Arc<[String]> = allowlist
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .into();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_with_listener(listener, router(groups, allowlist)));
    format!("http://{addr}")
}

#[tokio::test]
async fn test_cycle_then_publish_serves_summarized_items() {
    let server = upstream().await;
    let group = feed_group(&server, false).await;

    let report = pipeline(&server, &group).run_cycle().await;
    assert_eq!(report.fetched, Some(2));
    assert_eq!(report.enriched, Some(true));
    assert_eq!(report.marked_read, Some(2));

    let base = publish(&[Arc::clone(&group)], &[]).await;
    let response = reqwest::get(format!("{base}/rss/example")).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/rss+xml");
    let body = response.text().await.unwrap();
    assert_eq!(body.matches("<item>").count(), 2);
    assert_eq!(body.matches("<description>Model summary</description>").count(), 2);
}

#[tokio::test]
async fn test_second_cycle_does_not_resummarize() {
    let server = upstream().await;
    let group = feed_group(&server, false).await;
    let pipeline = pipeline(&server, &group);

    pipeline.run_cycle().await;
    let report = pipeline.run_cycle().await;

    assert_eq!(report.enriched, Some(true));
    assert_eq!(report.marked_read, Some(0));

    let model_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with(":generateContent"))
        .count();
    assert_eq!(model_calls, 2);
}

#[tokio::test]
async fn test_user_agent_allowlist() {
    let server = upstream().await;
    let group = feed_group(&server, false).await;
    pipeline(&server, &group).run_cycle().await;

    let base = publish(&[group], &["GoodBot"]).await;
    let client = reqwest::Client::new();

    let rejected = client
        .get(format!("{base}/rss/example"))
        .header("User-Agent", "EvilCrawler/1.0")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 401);
    assert!(!rejected.text().await.unwrap().contains("<rss"));

    let admitted = client
        .get(format!("{base}/rss/example"))
        .header("User-Agent", "GoodBot/2.0")
        .send()
        .await
        .unwrap();
    assert_eq!(admitted.status(), 200);
    assert!(admitted.text().await.unwrap().contains("<rss"));
}

#[tokio::test]
async fn test_failed_summary_dropped_from_cache() {
    let server = upstream().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Title: Broken"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    let group = feed_group(&server, true).await;

    let report = pipeline(&server, &group).run_cycle().await;
    assert_eq!(report.enriched, Some(false));

    for include_read in [false, true] {
        let items = group.client.list_cached_items(include_read).await.unwrap();
        assert!(items.iter().all(|i| i.title != "Broken"));
    }
    let all = group.client.list_cached_items(true).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "Good");
}

#[tokio::test]
async fn test_scraper_receives_rewritten_reddit_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"old\.reddit\.com/r/test/1$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Thread"))
        .expect(1)
        .mount(&server)
        .await;

    let sessions = JinaSessionFactory::new(
        server.uri(),
        None,
        Duration::from_secs(5),
        Arc::new(UrlPolicy::default()),
    );
    let session = sessions.new_session().unwrap();
    assert_eq!(session.scrape("https://www.reddit.com/r/test/1").await.unwrap(), "Thread");
    session.close().await.unwrap();
}

#[test]
fn test_policy_resolution() {
    let policy = UrlPolicy::default();
    assert_eq!(
        policy.resolve_url("https://www.reddit.com/r/test/1"),
        "https://old.reddit.com/r/test/1"
    );
    assert_eq!(
        policy.resolve_selector("https://x.com/user/status/1"),
        r#"div[data-testid="tweetText"]"#
    );
    assert_eq!(policy.resolve_url("https://unknown.example/a"), "https://unknown.example/a");
    assert_eq!(policy.resolve_selector("https://unknown.example/a"), "body");
}
