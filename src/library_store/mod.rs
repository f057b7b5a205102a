//! The authoritative record store.
//!
//! The librarian only needs a narrow slice of it: primary-key enumeration for
//! index reconciliation and a few maintenance primitives for the janitor.

mod models;
mod schema;
mod store;

pub use models::*;
pub use schema::LIBRARY_VERSIONED_SCHEMAS;
pub use store::SqliteLibraryStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;

pub trait LibraryStore: Send + Sync {
    /// Every primary key currently present in the store, read in one pass.
    fn valid_record_ids(&self) -> Result<HashSet<RecordId>>;

    fn record_exists(&self, id: RecordId) -> Result<bool>;

    /// All records with the fields the search index cares about.
    fn searchable_records(&self) -> Result<Vec<SearchableRecord>>;

    /// Delete rows left dangling by writes done with foreign keys disabled.
    fn clean_orphans(&self) -> Result<OrphanCleanupReport>;

    /// Delete recorded search queries last used before `older_than`.
    fn clean_search_queries(&self, older_than: DateTime<Utc>) -> Result<usize>;

    fn vacuum(&self) -> Result<VacuumReport>;

    /// Write a consistent copy of the database to `dest`. `dest` must not exist.
    fn backup_to(&self, dest: &Path) -> Result<()>;

    /// Apply `fields` to the bookmarks of `record_ids` owned by `filter`,
    /// creating missing bookmarks. Unknown records are skipped.
    fn update_bookmarks(
        &self,
        filter: &AuthFilter,
        record_ids: &[RecordId],
        fields: &BookmarkFields,
    ) -> Result<usize>;

    /// Returns false if the user does not exist.
    fn touch_user_active(&self, user_id: i64, at: DateTime<Utc>) -> Result<bool>;
}
