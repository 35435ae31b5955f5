//! Periodic fetch → enrich → reconcile loop for one feed group.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::client::{EnrichError, FeedBackend};
use crate::config::FeedGroupConfig;
use crate::content::SessionFactory;
use crate::feed::count_items;

/// A configured feed group bound to its client.
///
/// Built once at startup and shared by the group's pipeline and its
/// publisher route.
pub struct FeedGroup {
    pub config: FeedGroupConfig,
    pub client: Box<dyn FeedBackend>,
}

impl FeedGroup {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// What one cycle did. `None` fields mean the step did not run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub deleted: Option<u64>,
    pub fetched: Option<usize>,
    /// `Some(true)` when every new item was summarized
    pub enriched: Option<bool>,
    pub marked_read: Option<u64>,
}

const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub struct FeedPipeline {
    group: Arc<FeedGroup>,
    sessions: Arc<dyn SessionFactory>,
    interval: Duration,
}

impl FeedPipeline {
    /// `interval` is clamped to `1s..=MAX_INTERVAL`.
    pub fn new(
        group: Arc<FeedGroup>,
        sessions: Arc<dyn SessionFactory>,
        interval: Duration,
    ) -> Self {
        Self {
            group,
            sessions,
            interval: interval.clamp(MIN_INTERVAL, MAX_INTERVAL),
        }
    }

    /// Run cycles forever, the first one interval after start.
    ///
    /// Cycles run inline, so they never overlap; ticks missed by a long
    /// cycle are skipped.
    pub async fn run(self) {
        let now = tokio::time::Instant::now();
        let start = now.checked_add(self.interval).unwrap_or(now);
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            group = %self.group.name(),
            interval_secs = self.interval.as_secs(),
            "Feed pipeline started"
        );

        loop {
            ticker.tick().await;
            let report = self.run_cycle().await;
            tracing::debug!(group = %self.group.name(), ?report, "Cycle finished");
        }
    }

    /// Run one retention → fetch → enrich → reconcile cycle.
    ///
    /// Errors are logged and end the cycle early; they never propagate.
    pub async fn run_cycle(&self) -> CycleReport {
        let name = self.group.name();
        let client = &self.group.client;
        let mut report = CycleReport::default();

        match client.delete_old_cached_items().await {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::info!(group = %name, deleted, "Evicted old cached items");
                }
                report.deleted = Some(deleted);
            }
            Err(e) => {
                tracing::error!(group = %name, error = %e, "Failed to evict old cached items")
            }
        }

        let documents = match client.fetch_feeds(true).await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::error!(group = %name, error = %e, "Failed to fetch feeds");
                return report;
            }
        };
        let fetched = count_items(&documents);
        report.fetched = Some(fetched);

        if fetched > 0 {
            let session = self.sessions.new_session();
            let result = client.summarize_and_cache(&documents, session.as_deref()).await;

            if let Some(session) = session {
                if let Err(e) = session.close().await {
                    tracing::warn!(group = %name, error = %e, "Failed to close scrape session");
                }
            }

            match result {
                Ok(summary) => {
                    tracing::info!(
                        group = %name,
                        new_items = summary.total,
                        cached = summary.cached,
                        "Summarized and cached feed items"
                    );
                    report.enriched = Some(true);
                }
                Err(EnrichError::Partial { failed, total }) => {
                    tracing::warn!(
                        group = %name,
                        failed,
                        total,
                        "Some items could not be summarized"
                    );
                    report.enriched = Some(false);
                }
                Err(e) => {
                    tracing::error!(
                        group = %name,
                        error = %e,
                        "Failed to summarize and cache feeds"
                    );
                    report.enriched = Some(false);
                }
            }
        }

        let unread = match client.list_cached_items(false).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(group = %name, error = %e, "Failed to list cached items");
                return report;
            }
        };

        match client.mark_as_read(&unread).await {
            Ok(marked) => report.marked_read = Some(marked),
            Err(e) => {
                tracing::error!(group = %name, error = %e, "Failed to mark cached items as read")
            }
        }

        report
    }
}
