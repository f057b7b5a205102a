//! Brings the search index up to date with the library store.

use super::{IndexEntry, SearchIndex};
use crate::background_jobs::{StatusController, StatusKind, Task, TaskQueue};
use crate::library_store::{LibraryStore, RecordId, SearchableRecord};
use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 1000;

pub struct SearchIndexer {
    library_store: Arc<dyn LibraryStore>,
    search_index: Arc<dyn SearchIndex>,
    queue: Arc<dyn TaskQueue>,
    statuses: Arc<StatusController>,
    batch_size: usize,
}

impl SearchIndexer {
    pub fn new(
        library_store: Arc<dyn LibraryStore>,
        search_index: Arc<dyn SearchIndex>,
        queue: Arc<dyn TaskQueue>,
        statuses: Arc<StatusController>,
    ) -> Self {
        Self {
            library_store,
            search_index,
            queue,
            statuses,
            batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Records that changed since `since` or are not in the index at all.
    fn outdated_records(
        &self,
        records: Vec<SearchableRecord>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SearchableRecord>> {
        let indexed: HashSet<RecordId> = self
            .search_index
            .all_documents()?
            .into_iter()
            .filter_map(|doc| doc.record_id)
            .collect();
        Ok(records
            .into_iter()
            .filter(|r| !indexed.contains(&r.id) || since.map_or(true, |since| r.updated_at >= since))
            .collect())
    }

    /// Index every record changed since the last update, or rebuild the whole
    /// index when `force` is set. Returns the number of records written.
    ///
    /// A non-forced update then queues a stale entry removal pass, which runs
    /// once the tasks ahead of it are done.
    pub fn update(&self, force: bool) -> Result<usize> {
        let indexed = {
            let kind = if force {
                StatusKind::SearchIndexRebuild
            } else {
                StatusKind::SearchIndexUpdate
            };
            let guard = self.statuses.begin(kind, None);
            let start = Instant::now();
            // Store timestamps have one second resolution.
            let mark = Utc::now().trunc_subsecs(0);

            if !self.search_index.is_setup_complete() {
                self.search_index.setup()?;
            }

            let records = self.library_store.searchable_records()?;
            let records = if force {
                info!("Rebuilding search index from {} records", records.len());
                self.search_index.clear()?;
                records
            } else {
                let since = self.search_index.last_updated()?;
                self.outdated_records(records, since)?
            };

            let total = records.len() as u64;
            guard.update(0, Some(total));
            let mut indexed = 0;
            for batch in records.chunks(self.batch_size) {
                let entries: Vec<IndexEntry> = batch
                    .iter()
                    .map(|r| IndexEntry {
                        record_id: r.id,
                        title: r.title.clone(),
                        series: r.series.clone(),
                    })
                    .collect();
                indexed += self.search_index.upsert_documents(&entries)?;
                guard.update(indexed as u64, Some(total));
            }
            self.search_index.set_last_updated(mark)?;

            if indexed > 0 {
                info!(
                    "Indexed {} records in {:?}",
                    indexed,
                    start.elapsed()
                );
            } else {
                debug!("Search index already up to date");
            }
            indexed
        };

        if !force {
            if let Err(err) = self.queue.put(Task::SearchIndexRemoveStale) {
                warn!("Failed to queue stale search entry removal: {}", err);
            }
        }
        Ok(indexed)
    }
}
