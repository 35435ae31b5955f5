//! Per-feed-group item cache backed by SQLite.
//!
//! Each feed group owns exactly one [`Database`]. The feed pipeline is the
//! only writer; the publisher only reads.

mod items;
mod schema;
mod types;

pub use schema::Database;
pub use types::{CachedItem, DatabaseError, NewItem};
