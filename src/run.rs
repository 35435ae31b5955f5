//! Process orchestration: build every feed group, start its pipeline,
//! then serve all groups over HTTP.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;

use crate::client::{ClientOptions, FeedClient};
use crate::config::Config;
use crate::content::{JinaSessionFactory, SessionFactory, UrlPolicy};
use crate::pipeline::{FeedGroup, FeedPipeline};
use crate::server;
use crate::summarize::DEFAULT_GEMINI_BASE_URL;

/// Build feed groups from `config`.
///
/// A group whose client cannot be built is logged and left out, so it gets
/// neither a pipeline nor a route.
pub async fn build_groups(config: &Config, api_keys: Arc<[SecretString]>) -> Vec<Arc<FeedGroup>> {
    let mut groups = Vec::with_capacity(config.feeds.len());

    for feed in &config.feeds {
        let options = ClientOptions {
            fetch_timeout: config.fetch_timeout,
            drop_failed_summaries: feed.drop_items_with_failed_summaries,
            retention: config.cache_retention,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        };
        let cache_path = feed.cache_path(&config.db_files_dir);

        let mut client = match FeedClient::new(
            Arc::clone(&api_keys),
            feed.feed_urls.clone(),
            &cache_path,
            options,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(
                    group = %feed.name,
                    cache = %cache_path.display(),
                    error = %e,
                    "Failed to create feed client, skipping group"
                );
                continue;
            }
        };
        client.configure(config.models.clone(), &config.desired_language, config.verbose);

        groups.push(Arc::new(FeedGroup {
            config: feed.clone(),
            client: Box::new(client),
        }));
    }

    groups
}

/// Run until the HTTP listener fails.
pub async fn run(mut config: Config) -> Result<()> {
    let api_keys: Arc<[SecretString]> = std::mem::take(&mut config.api_keys).into();
    let groups = build_groups(&config, api_keys).await;
    if groups.is_empty() {
        tracing::warn!("No feed groups could be started");
    }

    let sessions: Arc<dyn SessionFactory> = Arc::new(JinaSessionFactory::new(
        config.scraper_base_url.clone(),
        config.jina_api_key.take(),
        config.fetch_timeout,
        Arc::new(UrlPolicy::default()),
    ));

    for group in &groups {
        let pipeline = FeedPipeline::new(
            Arc::clone(group),
            Arc::clone(&sessions),
            config.fetch_interval,
        );
        tokio::spawn(pipeline.run());
    }

    let allowlist: Arc<[String]> = config.permitted_user_agents.into();
    let router = server::router(&groups, allowlist);
    server::serve(config.server_port, router).await
}
