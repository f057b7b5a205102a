//! Removes index documents whose record no longer exists in the store.

use super::{DocNum, SearchIndex};
use crate::background_jobs::{StatusController, StatusKind, TaskQueue};
use crate::library_store::LibraryStore;
use crate::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

pub const DEFAULT_REMOVE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Other tasks were waiting; the pass did not start.
    #[error("Stale entry removal aborted, task queue is busy")]
    Aborted,

    #[error("Stale entry removal failed: {0:#}")]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: usize,
    pub elapsed: Duration,
}

pub struct SearchIndexReconciler {
    library_store: Arc<dyn LibraryStore>,
    search_index: Arc<dyn SearchIndex>,
    queue: Arc<dyn TaskQueue>,
    statuses: Arc<StatusController>,
    batch_size: usize,
}

impl SearchIndexReconciler {
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
            batch_size: DEFAULT_REMOVE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Doc numbers of every document whose record id is missing from the store.
    fn stale_doc_nums(&self) -> anyhow::Result<Vec<DocNum>> {
        let valid_ids = self.library_store.valid_record_ids()?;
        self.search_index.refresh()?;
        let stale = self
            .search_index
            .all_documents()?
            .into_iter()
            .filter(|doc| !doc.record_id.is_some_and(|id| valid_ids.contains(&id)))
            .map(|doc| doc.doc_num)
            .collect();
        Ok(stale)
    }

    /// Run one reconciliation pass.
    ///
    /// Does nothing and returns [`ReconcileError::Aborted`] when the task queue
    /// is not empty. The emptiness check is a snapshot, not a lock.
    pub fn remove_stale(&self) -> Result<ReconcileReport, ReconcileError> {
        let guard = self.statuses.begin(StatusKind::SearchIndexRemoveStale, None);
        if !self.queue.is_empty() {
            return Err(ReconcileError::Aborted);
        }
        let start = Instant::now();

        if !self.search_index.is_setup_complete() {
            self.search_index.setup()?;
        }

        let stale = self.stale_doc_nums()?;
        let total = stale.len() as u64;
        guard.update(0, Some(total));

        let mut removed = 0;
        let mut complete = 0;
        for batch in stale.chunks(self.batch_size) {
            removed += self.search_index.remove_documents(batch)?;
            complete += batch.len() as u64;
            guard.update(complete, Some(total));
        }
        metrics::record_stale_removed(removed as u64);

        Ok(ReconcileReport {
            removed,
            elapsed: start.elapsed(),
        })
    }

    /// Run a pass and log its outcome. Never fails.
    pub fn run(&self) {
        match self.remove_stale() {
            Ok(report) if report.removed > 0 => {
                let secs = report.elapsed.as_secs_f64();
                let per_second = if secs > 0.0 {
                    (report.removed as f64 / secs) as u64
                } else {
                    report.removed as u64
                };
                info!(
                    "Removed {} stale records from the search index in {:?} at {} per second",
                    report.removed, report.elapsed, per_second
                );
            }
            Ok(_) => debug!("No stale records to remove from the search index"),
            Err(ReconcileError::Aborted) => {
                debug!("Search index stale record removal aborted, queue is busy")
            }
            Err(err) => error!("Removing stale records from the search index: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::{MemoryTaskQueue, Task};
    use crate::library_store::{
        AuthFilter, BookmarkFields, OrphanCleanupReport, RecordId, SearchableRecord,
        VacuumReport,
    };
    use crate::search::{IndexEntry, IndexedDocument, SearchHit};
    use anyhow::{bail, Result};
    use chrono::{DateTime, Utc};
    use std::collections::{BTreeMap, HashSet};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        ids: HashSet<RecordId>,
        fail: bool,
        reads: AtomicUsize,
    }

    impl LibraryStore for FakeStore {
        fn valid_record_ids(&self) -> Result<HashSet<RecordId>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("store unavailable");
            }
            Ok(self.ids.clone())
        }
        fn record_exists(&self, id: RecordId) -> Result<bool> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.ids.contains(&id))
        }
        fn searchable_records(&self) -> Result<Vec<SearchableRecord>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        fn clean_orphans(&self) -> Result<OrphanCleanupReport> {
            unimplemented!()
        }
        fn clean_search_queries(&self, _older_than: DateTime<Utc>) -> Result<usize> {
            unimplemented!()
        }
        fn vacuum(&self) -> Result<VacuumReport> {
            unimplemented!()
        }
        fn backup_to(&self, _dest: &Path) -> Result<()> {
            unimplemented!()
        }
        fn update_bookmarks(
            &self,
            _filter: &AuthFilter,
            _record_ids: &[RecordId],
            _fields: &BookmarkFields,
        ) -> Result<usize> {
            unimplemented!()
        }
        fn touch_user_active(&self, _user_id: i64, _at: DateTime<Utc>) -> Result<bool> {
            unimplemented!()
        }
    }

    /// Documents keyed by doc number; counts every call.
    #[derive(Default)]
    struct FakeIndex {
        docs: Mutex<BTreeMap<DocNum, Option<RecordId>>>,
        calls: AtomicUsize,
        remove_batches: Mutex<Vec<usize>>,
        /// Read on every removal to capture progress as the handler reports it.
        watched: Mutex<Option<Arc<StatusController>>>,
        progress: Mutex<Vec<(bool, u64, Option<u64>)>>,
    }

    impl FakeIndex {
        fn with_records(ids: &[Option<RecordId>]) -> Self {
            let index = Self::default();
            {
                let mut docs = index.docs.lock().unwrap();
                for (doc_num, id) in ids.iter().enumerate() {
                    docs.insert(doc_num as DocNum + 100, *id);
                }
            }
            index
        }

        fn record_ids(&self) -> Vec<Option<RecordId>> {
            self.docs.lock().unwrap().values().copied().collect()
        }

        fn touch(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SearchIndex for FakeIndex {
        fn setup(&self) -> Result<()> {
            self.touch();
            Ok(())
        }
        fn is_setup_complete(&self) -> bool {
            self.touch();
            true
        }
        fn refresh(&self) -> Result<()> {
            self.touch();
            Ok(())
        }
        fn all_documents(&self) -> Result<Vec<IndexedDocument>> {
            self.touch();
            Ok(self
                .docs
                .lock()
                .unwrap()
                .iter()
                .map(|(doc_num, record_id)| IndexedDocument {
                    doc_num: *doc_num,
                    record_id: *record_id,
                })
                .collect())
        }
        fn remove_documents(&self, doc_nums: &[DocNum]) -> Result<usize> {
            self.touch();
            self.remove_batches.lock().unwrap().push(doc_nums.len());
            if let Some(statuses) = self.watched.lock().unwrap().as_ref() {
                let status = statuses.get(StatusKind::SearchIndexRemoveStale).unwrap();
                self.progress
                    .lock()
                    .unwrap()
                    .push((status.active, status.complete, status.total));
            }
            let mut docs = self.docs.lock().unwrap();
            Ok(doc_nums
                .iter()
                .filter(|doc_num| docs.remove(doc_num).is_some())
                .count())
        }
        fn upsert_documents(&self, _entries: &[IndexEntry]) -> Result<usize> {
            self.touch();
            Ok(0)
        }
        fn clear(&self) -> Result<()> {
            self.touch();
            Ok(())
        }
        fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
            self.touch();
            Ok(Vec::new())
        }
        fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
            self.touch();
            Ok(None)
        }
        fn set_last_updated(&self, _at: DateTime<Utc>) -> Result<()> {
            self.touch();
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<FakeStore>,
        index: Arc<FakeIndex>,
        queue: Arc<MemoryTaskQueue>,
        statuses: Arc<StatusController>,
    }

    impl Fixture {
        fn new(store: FakeStore, index: FakeIndex) -> Self {
            Self {
                store: Arc::new(store),
                index: Arc::new(index),
                queue: Arc::new(MemoryTaskQueue::new()),
                statuses: Arc::new(StatusController::new()),
            }
        }

        fn reconciler(&self) -> SearchIndexReconciler {
            SearchIndexReconciler::new(
                self.store.clone(),
                self.index.clone(),
                self.queue.clone(),
                self.statuses.clone(),
            )
        }

        fn status_active(&self) -> bool {
            self.statuses
                .get(StatusKind::SearchIndexRemoveStale)
                .is_some_and(|s| s.active)
        }
    }

    fn store_with(ids: &[RecordId]) -> FakeStore {
        FakeStore {
            ids: ids.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_removes_exactly_the_missing_records() {
        let fixture = Fixture::new(
            store_with(&[1, 2, 3]),
            FakeIndex::with_records(&[Some(1), Some(2), Some(3), Some(4), Some(5)]),
        );

        let report = fixture.reconciler().remove_stale().unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(fixture.index.record_ids(), vec![Some(1), Some(2), Some(3)]);
        assert!(!fixture.status_active());
    }

    #[test]
    fn test_second_pass_removes_nothing() {
        let fixture = Fixture::new(
            store_with(&[1, 2, 3]),
            FakeIndex::with_records(&[Some(1), Some(4), Some(3), Some(5)]),
        );
        let reconciler = fixture.reconciler();

        assert_eq!(reconciler.remove_stale().unwrap().removed, 2);
        assert_eq!(reconciler.remove_stale().unwrap().removed, 0);
    }

    #[test]
    fn test_missing_record_id_counts_as_stale() {
        let fixture = Fixture::new(
            store_with(&[1]),
            FakeIndex::with_records(&[Some(1), None]),
        );
        assert_eq!(fixture.reconciler().remove_stale().unwrap().removed, 1);
        assert_eq!(fixture.index.record_ids(), vec![Some(1)]);
    }

    #[test]
    fn test_busy_queue_aborts_without_touching_store_or_index() {
        let fixture = Fixture::new(
            store_with(&[1]),
            FakeIndex::with_records(&[Some(1), Some(2)]),
        );
        fixture.queue.put(Task::VacuumDatabase).unwrap();

        let result = fixture.reconciler().remove_stale();
        assert!(matches!(result, Err(ReconcileError::Aborted)));
        assert_eq!(fixture.store.reads.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.index.record_ids().len(), 2);
        assert!(!fixture.status_active());
    }

    #[test]
    fn test_empty_index_is_a_noop() {
        let fixture = Fixture::new(store_with(&[1, 2]), FakeIndex::default());
        let report = fixture.reconciler().remove_stale().unwrap();
        assert_eq!(report.removed, 0);
        assert!(fixture.index.remove_batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_store_failure_leaves_status_inactive() {
        let fixture = Fixture::new(
            FakeStore {
                fail: true,
                ..Default::default()
            },
            FakeIndex::with_records(&[Some(1)]),
        );

        let result = fixture.reconciler().remove_stale();
        assert!(matches!(result, Err(ReconcileError::Failed(_))));
        assert!(!fixture.status_active());
        assert_eq!(fixture.index.record_ids(), vec![Some(1)]);

        // run() swallows the error.
        fixture.reconciler().run();
        assert!(!fixture.status_active());
    }

    #[test]
    fn test_removes_in_batches() {
        let records: Vec<Option<RecordId>> = (1..=7).map(Some).collect();
        let fixture = Fixture::new(store_with(&[1]), FakeIndex::with_records(&records));

        let report = fixture
            .reconciler()
            .with_batch_size(3)
            .remove_stale()
            .unwrap();
        assert_eq!(report.removed, 6);
        assert_eq!(*fixture.index.remove_batches.lock().unwrap(), vec![3, 3]);
        assert_eq!(fixture.index.record_ids(), vec![Some(1)]);
    }

    #[test]
    fn test_reports_progress_before_each_batch() {
        let records: Vec<Option<RecordId>> = (1..=7).map(Some).collect();
        let fixture = Fixture::new(store_with(&[1]), FakeIndex::with_records(&records));
        *fixture.index.watched.lock().unwrap() = Some(fixture.statuses.clone());

        fixture
            .reconciler()
            .with_batch_size(3)
            .remove_stale()
            .unwrap();

        assert_eq!(
            *fixture.index.progress.lock().unwrap(),
            vec![(true, 0, Some(6)), (true, 3, Some(6))]
        );
        let status = fixture.statuses.get(StatusKind::SearchIndexRemoveStale).unwrap();
        assert!(!status.active);
        assert_eq!((status.complete, status.total), (0, None));
    }
}
