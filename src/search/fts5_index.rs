//! FTS5-based search index using SQLite full-text search

use super::{DocNum, IndexEntry, IndexedDocument, SearchHit, SearchIndex};
use crate::library_store::RecordId;
use crate::sqlite_persistence::BUSY_TIMEOUT;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const LAST_UPDATED_KEY: &str = "last_updated";

/// FTS5 search index with a trigram tokenizer. Document numbers are FTS rowids.
pub struct Fts5SearchIndex {
    conn: Mutex<Connection>,
    setup_complete: AtomicBool,
}

impl Fts5SearchIndex {
    /// Open the index database. Tables are created lazily by [`SearchIndex::setup`].
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).context("Failed to open search index database")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Enable WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
            setup_complete: AtomicBool::new(false),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parse_record_id(value: Value) -> Option<RecordId> {
        match value {
            Value::Integer(id) => Some(id),
            Value::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn document_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM search_index", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

impl SearchIndex for Fts5SearchIndex {
    fn setup(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS search_index USING fts5(
                record_id UNINDEXED,
                title,
                series,
                tokenize='trigram'
            );
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )
        .context("Failed to create search index tables")?;
        self.setup_complete.store(true, Ordering::SeqCst);
        debug!("FTS5 search index set up");
        Ok(())
    }

    fn is_setup_complete(&self) -> bool {
        if self.setup_complete.load(Ordering::SeqCst) {
            return true;
        }
        let conn = self.conn();
        let exists = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('search_index', 'index_meta')",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|count| count == 2)
            .unwrap_or(false);
        if exists {
            self.setup_complete.store(true, Ordering::SeqCst);
        }
        exists
    }

    // Every statement reads the latest committed state; this only checks the
    // connection is still usable.
    fn refresh(&self) -> Result<()> {
        let conn = self.conn();
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .context("Search index connection is not usable")?;
        Ok(())
    }

    fn all_documents(&self) -> Result<Vec<IndexedDocument>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT rowid, record_id FROM search_index")?;
        let documents = stmt
            .query_map([], |row| {
                Ok(IndexedDocument {
                    doc_num: row.get(0)?,
                    record_id: Self::parse_record_id(row.get(1)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    fn remove_documents(&self, doc_nums: &[DocNum]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM search_index WHERE rowid = ?1")?;
            for doc_num in doc_nums {
                removed += stmt.execute(params![doc_num])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn upsert_documents(&self, entries: &[IndexEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            // record_id is UNINDEXED, so resolve existing documents in one scan.
            let mut existing: HashMap<RecordId, Vec<DocNum>> = HashMap::new();
            let mut scan = tx.prepare("SELECT rowid, record_id FROM search_index")?;
            let rows = scan.query_map([], |row| {
                Ok((row.get::<_, DocNum>(0)?, row.get::<_, Value>(1)?))
            })?;
            for row in rows {
                let (doc_num, value) = row?;
                if let Some(record_id) = Self::parse_record_id(value) {
                    existing.entry(record_id).or_default().push(doc_num);
                }
            }

            let mut delete = tx.prepare("DELETE FROM search_index WHERE rowid = ?1")?;
            let mut insert = tx.prepare(
                "INSERT INTO search_index (record_id, title, series) VALUES (?1, ?2, ?3)",
            )?;
            for entry in entries {
                if let Some(doc_nums) = existing.get(&entry.record_id) {
                    for doc_num in doc_nums {
                        delete.execute(params![doc_num])?;
                    }
                }
                insert.execute(params![entry.record_id, entry.title, entry.series])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM search_index", [])?;
        conn.execute(
            "DELETE FROM index_meta WHERE key = ?1",
            params![LAST_UPDATED_KEY],
        )?;
        Ok(())
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let conn = self.conn();

        // Escape special FTS5 characters by quoting the whole query
        let escaped_query = format!("\"{}\"", query.replace('"', "\"\""));

        let mut stmt = conn.prepare(
            r#"SELECT record_id, title, bm25(search_index) as score
               FROM search_index
               WHERE search_index MATCH ?1
               ORDER BY score
               LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(params![escaped_query, max_results as i64], |row| {
            Ok((
                row.get::<_, Value>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (record_id, title, score) = row?;
            match Self::parse_record_id(record_id) {
                // BM25 scores are negative (more negative = better match)
                Some(record_id) => hits.push(SearchHit {
                    record_id,
                    title,
                    score: -score,
                }),
                None => warn!("Search index document without a record id: {}", title),
            }
        }
        Ok(hits)
    }

    fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![LAST_UPDATED_KEY],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        }))
    }

    fn set_last_updated(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![LAST_UPDATED_KEY, at.to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(record_id: RecordId, title: &str) -> IndexEntry {
        IndexEntry {
            record_id,
            title: title.to_string(),
            series: None,
        }
    }

    fn create_index() -> (Fts5SearchIndex, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let index = Fts5SearchIndex::new(&temp_dir.path().join("search.db")).unwrap();
        index.setup().unwrap();
        (index, temp_dir)
    }

    #[test]
    fn test_setup_is_detected_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("search.db");

        let index = Fts5SearchIndex::new(&db_path).unwrap();
        assert!(!index.is_setup_complete());
        index.setup().unwrap();
        assert!(index.is_setup_complete());
        drop(index);

        let reopened = Fts5SearchIndex::new(&db_path).unwrap();
        assert!(reopened.is_setup_complete());
    }

    #[test]
    fn test_upsert_replaces_existing_document() {
        let (index, _dir) = create_index();
        index
            .upsert_documents(&[entry(1, "Saga Volume One"), entry(2, "Monstress")])
            .unwrap();
        index.upsert_documents(&[entry(1, "Saga Volume Two")]).unwrap();

        let documents = index.all_documents().unwrap();
        assert_eq!(documents.len(), 2);
        let hits = index.search("Two", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, 1);
        assert!(index.search("Volume One", 10).unwrap().is_empty());
    }

    #[test]
    fn test_remove_documents_by_doc_num() {
        let (index, _dir) = create_index();
        index
            .upsert_documents(&[entry(1, "Alpha"), entry(2, "Bravo"), entry(3, "Charlie")])
            .unwrap();

        let to_remove: Vec<DocNum> = index
            .all_documents()
            .unwrap()
            .into_iter()
            .filter(|d| d.record_id != Some(2))
            .map(|d| d.doc_num)
            .collect();

        // Removing twice only counts documents that existed.
        assert_eq!(index.remove_documents(&to_remove).unwrap(), 2);
        assert_eq!(index.remove_documents(&to_remove).unwrap(), 0);

        let remaining = index.all_documents().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].record_id, Some(2));
    }

    #[test]
    fn test_unparseable_record_id_is_none() {
        let (index, _dir) = create_index();
        {
            let conn = index.conn();
            conn.execute(
                "INSERT INTO search_index (record_id, title, series) VALUES ('garbage', 'x', NULL)",
                [],
            )
            .unwrap();
        }
        let documents = index.all_documents().unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].record_id, None);
    }

    #[test]
    fn test_last_updated_roundtrip_and_clear() {
        let (index, _dir) = create_index();
        assert_eq!(index.last_updated().unwrap(), None);

        let at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        index.set_last_updated(at).unwrap();
        assert_eq!(index.last_updated().unwrap(), Some(at));

        index.upsert_documents(&[entry(1, "Alpha")]).unwrap();
        index.clear().unwrap();
        assert_eq!(index.document_count().unwrap(), 0);
        assert_eq!(index.last_updated().unwrap(), None);
    }
}
