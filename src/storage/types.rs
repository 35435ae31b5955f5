use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while opening a feed group's cache database
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the cache file locked
    #[error("Cache database is locked by another process")]
    Locked,

    /// Migration failed
    #[error("Cache migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, folding SQLite lock conditions into [`DatabaseError::Locked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::Locked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as text only
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// An item about to enter the cache, already enriched (or not) by the caller.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub summary: Option<String>,
    /// Why summarization failed, when it did
    pub summary_error: Option<String>,
}

/// A cached feed item as stored for one feed group.
///
/// `read` flips to true once a reconciliation pass has delivered the item;
/// the published feed keeps showing it until retention removes it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CachedItem {
    pub id: i64,
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub summary: Option<String>,
    pub summary_error: Option<String>,
    pub read: bool,
    pub cached_at: i64,
}
