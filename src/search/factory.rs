//! Factory function for creating search index instances

use super::{Fts5SearchIndex, NoopSearchIndex, SearchIndex};
use crate::config::SearchEngine;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Create a search index based on the configured search engine.
///
/// FTS5 indexes live in `search.db` inside `db_dir`.
pub fn create_search_index(engine: &SearchEngine, db_dir: &Path) -> Result<Arc<dyn SearchIndex>> {
    match engine {
        SearchEngine::Fts5 => {
            let db_path = db_dir.join("search.db");
            info!("Opening FTS5 search index at {:?}", db_path);
            Ok(Arc::new(Fts5SearchIndex::new(&db_path)?))
        }
        SearchEngine::NoOp => {
            info!("Creating NoOp search index (search disabled)");
            Ok(Arc::new(NoopSearchIndex))
        }
    }
}
