//! Test fixtures for the library and search databases

use super::constants::RECORD_TITLES;
use pezzottify_librarian::library_store::{NewRecord, RecordId, SqliteLibraryStore};
use pezzottify_librarian::search::{Fts5SearchIndex, IndexEntry, SearchIndex};
use std::path::Path;

/// Create `library.db` in `db_dir` with the standard test records.
pub fn create_test_library(db_dir: &Path) -> Vec<RecordId> {
    let store = SqliteLibraryStore::new(db_dir.join("library.db"))
        .expect("Failed to create test library");
    RECORD_TITLES
        .iter()
        .enumerate()
        .map(|(i, title)| {
            store
                .insert_record(&NewRecord::new(format!("/library/{i}.cbz"), *title))
                .expect("Failed to insert test record")
        })
        .collect()
}

/// Put documents for `record_ids` into `search.db` before the librarian starts.
pub fn seed_search_index(db_dir: &Path, record_ids: &[RecordId]) {
    let index =
        Fts5SearchIndex::new(&db_dir.join("search.db")).expect("Failed to create search index");
    index.setup().expect("Failed to set up search index");
    let entries: Vec<IndexEntry> = record_ids
        .iter()
        .map(|id| IndexEntry {
            record_id: *id,
            title: format!("Seeded {id}"),
            series: None,
        })
        .collect();
    index
        .upsert_documents(&entries)
        .expect("Failed to seed search index");
}
