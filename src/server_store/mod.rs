//! Server-side state that must survive restarts.

mod schema;
mod sqlite_server_store;

pub use schema::SERVER_VERSIONED_SCHEMAS;
pub use sqlite_server_store::SqliteServerStore;

use anyhow::Result;

/// Small key-value store for librarian bookkeeping (e.g. the cron marker).
pub trait ServerStore: Send + Sync {
    fn get_state(&self, key: &str) -> Result<Option<String>>;
    fn set_state(&self, key: &str, value: &str) -> Result<()>;
    fn delete_state(&self, key: &str) -> Result<()>;
}
