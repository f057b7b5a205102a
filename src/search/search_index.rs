//! Search index trait and document types

use crate::library_store::RecordId;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Index-internal document number. Not a record id.
pub type DocNum = i64;

/// One document as enumerated from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedDocument {
    pub doc_num: DocNum,
    /// The record key stored with the document; `None` if missing or unparseable.
    pub record_id: Option<RecordId>,
}

/// Content to add to the index for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub record_id: RecordId,
    pub title: String,
    pub series: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record_id: RecordId,
    pub title: String,
    pub score: f64,
}

pub trait SearchIndex: Send + Sync {
    /// Create the index structures. Safe to call on an already set-up index.
    fn setup(&self) -> Result<()>;

    fn is_setup_complete(&self) -> bool;

    /// Make writes committed by other handles visible to subsequent reads.
    fn refresh(&self) -> Result<()>;

    /// Unscored enumeration of every document in the index.
    fn all_documents(&self) -> Result<Vec<IndexedDocument>>;

    /// Remove documents by number, returning how many were actually removed.
    fn remove_documents(&self, doc_nums: &[DocNum]) -> Result<usize>;

    /// Add or replace the documents for the given records.
    fn upsert_documents(&self, entries: &[IndexEntry]) -> Result<usize>;

    /// Remove every document and the last-updated mark.
    fn clear(&self) -> Result<()>;

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;

    fn last_updated(&self) -> Result<Option<DateTime<Utc>>>;

    fn set_last_updated(&self, at: DateTime<Utc>) -> Result<()>;
}

/// A no-op search index used when search is disabled.
pub struct NoopSearchIndex;

impl SearchIndex for NoopSearchIndex {
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    fn is_setup_complete(&self) -> bool {
        true
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn all_documents(&self) -> Result<Vec<IndexedDocument>> {
        Ok(Vec::new())
    }

    fn remove_documents(&self, _doc_nums: &[DocNum]) -> Result<usize> {
        Ok(0)
    }

    fn upsert_documents(&self, _entries: &[IndexEntry]) -> Result<usize> {
        Ok(0)
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    fn set_last_updated(&self, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}
