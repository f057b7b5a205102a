//! Pezzottify Librarian Library
//!
//! Background maintenance for the library database: a task queue, the
//! dispatcher that drains it, the nightly cron and search index upkeep.

pub mod background_jobs;
pub mod config;
pub mod library_store;
pub mod librarian;
pub mod metrics;
pub mod search;
pub mod server_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use background_jobs::{StatusController, Task, TaskQueue};
pub use librarian::{Librarian, LibrarianOptions};
pub use library_store::{LibraryStore, SqliteLibraryStore};
pub use search::{SearchIndex, SearchIndexReconciler};
pub use server_store::{ServerStore, SqliteServerStore};
