mod factory;
mod fts5_index;
mod indexer;
mod reconciler;
mod search_index;

pub use factory::create_search_index;
pub use fts5_index::Fts5SearchIndex;
pub use indexer::{SearchIndexer, DEFAULT_UPSERT_BATCH_SIZE};
pub use reconciler::{
    ReconcileError, ReconcileReport, SearchIndexReconciler, DEFAULT_REMOVE_BATCH_SIZE,
};
pub use search_index::*;
