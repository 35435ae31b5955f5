use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// One feed group's item cache.
///
/// Cloning is cheap (the pool is reference counted). Each feed group opens
/// its own file, so read/unread state never crosses groups.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the cache at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory cache, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if another process holds the file,
    /// `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Cache files may hold scraped article text; keep them user-only
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(
                        path = %path,
                        error = %e,
                        "Failed to set cache file permissions"
                    );
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // SQLite reports the real error at connect time
                }
            }
        }

        // The pipeline writes while publisher requests read concurrently
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::Locked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Create the schema inside one transaction; every statement is idempotent.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                guid TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                link TEXT,
                description TEXT,
                author TEXT,
                published INTEGER,
                summary TEXT,
                summary_error TEXT,
                read INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Reconciliation lists unread items every cycle
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_unread ON items(cached_at DESC) WHERE read = 0",
        )
        .execute(&mut *tx)
        .await?;

        // Retention scans read items by age
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_read_cached ON items(read, cached_at)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
