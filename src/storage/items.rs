use anyhow::Result;
use sqlx::QueryBuilder;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{CachedItem, NewItem};

/// Maximum number of items returned by a single listing (OOM protection)
const MAX_ITEMS: i64 = 2000;

/// IN-list chunk size, well under SQLite's bind-parameter limit
const CHUNK_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Item Mutations
    // ========================================================================

    /// Insert an item unless its GUID is already cached.
    ///
    /// Returns `true` if a row was added. Existing rows are left untouched so
    /// that read state and earlier summaries survive re-fetches.
    pub async fn insert_item(&self, item: &NewItem) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO items
                (guid, title, link, description, author, published,
                 summary, summary_error, cached_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&item.guid)
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.description)
        .bind(&item.author)
        .bind(item.published)
        .bind(&item.summary)
        .bind(&item.summary_error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark the given items as read, returns how many actually changed.
    ///
    /// Idempotent: already-read rows are skipped by `WHERE read = 0`.
    pub async fn mark_items_read(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut changed = 0;

        for chunk in ids.chunks(CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("UPDATE items SET read = 1 WHERE read = 0 AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            changed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(changed)
    }

    /// Delete read items cached before `cutoff` (unix seconds).
    ///
    /// Unread items are never evicted: they have not been delivered yet.
    pub async fn delete_read_items_older_than(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM items WHERE read = 1 AND cached_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Item Queries
    // ========================================================================

    /// List cached items, newest first.
    ///
    /// With `include_read = false` only undelivered items are returned.
    pub async fn list_items(&self, include_read: bool) -> Result<Vec<CachedItem>> {
        let filter = if include_read { "" } else { "WHERE read = 0" };
        let query = format!(
            r#"
            SELECT id, guid, title, link, description, author, published,
                   summary, summary_error, read, cached_at
            FROM items
            {filter}
            ORDER BY COALESCE(published, cached_at) DESC, id DESC
            LIMIT ?
        "#
        );

        let items = sqlx::query_as::<_, CachedItem>(&query)
            .bind(MAX_ITEMS)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Return the subset of `guids` that are already cached.
    pub async fn known_guids(&self, guids: &[String]) -> Result<HashSet<String>> {
        let mut known = HashSet::new();

        for chunk in guids.chunks(CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT guid FROM items WHERE guid IN (");
            let mut separated = builder.separated(", ");
            for guid in chunk {
                separated.push_bind(guid);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            known.extend(rows.into_iter().map(|(guid,)| guid));
        }

        Ok(known)
    }
}
