//! Progress registry for long-running maintenance work.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusKind {
    SearchIndexUpdate,
    SearchIndexRebuild,
    SearchIndexRemoveStale,
    JanitorCleanForeignKeys,
    JanitorCleanSearchQueries,
    JanitorVacuum,
    JanitorBackup,
    JanitorUpdate,
    CoversRemoveOrphans,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::SearchIndexUpdate => "search_index_update",
            StatusKind::SearchIndexRebuild => "search_index_rebuild",
            StatusKind::SearchIndexRemoveStale => "search_index_remove_stale",
            StatusKind::JanitorCleanForeignKeys => "janitor_clean_foreign_keys",
            StatusKind::JanitorCleanSearchQueries => "janitor_clean_search_queries",
            StatusKind::JanitorVacuum => "janitor_vacuum",
            StatusKind::JanitorBackup => "janitor_backup",
            StatusKind::JanitorUpdate => "janitor_update",
            StatusKind::CoversRemoveOrphans => "covers_remove_orphans",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub active: bool,
    pub complete: u64,
    /// `None` while the amount of work is unknown.
    pub total: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Process-wide map of in-flight operations, keyed by [`StatusKind`].
///
/// Records are never removed, only retired by [`StatusController::finish`].
/// Observers call [`StatusController::subscribe`] and re-read the snapshot
/// when the revision changes.
pub struct StatusController {
    statuses: RwLock<HashMap<StatusKind, Status>>,
    revision: watch::Sender<u64>,
}

impl Default for StatusController {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusController {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            statuses: RwLock::new(HashMap::new()),
            revision,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<StatusKind, Status>> {
        self.statuses.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StatusKind, Status>> {
        self.statuses.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    pub fn start(&self, kind: StatusKind, total: Option<u64>) {
        let now = Utc::now();
        self.write().insert(
            kind,
            Status {
                kind,
                active: true,
                complete: 0,
                total,
                started_at: now,
                updated_at: now,
            },
        );
        self.bump();
    }

    /// Report progress. `complete` is clamped to `total` when one is known.
    pub fn update(&self, kind: StatusKind, complete: u64, total: Option<u64>) {
        let now = Utc::now();
        {
            let mut statuses = self.write();
            let status = statuses.entry(kind).or_insert_with(|| Status {
                kind,
                active: true,
                complete: 0,
                total: None,
                started_at: now,
                updated_at: now,
            });
            status.complete = total.map_or(complete, |total| complete.min(total));
            status.total = total;
            status.updated_at = now;
        }
        self.bump();
    }

    pub fn finish(&self, kind: StatusKind) {
        {
            let mut statuses = self.write();
            if let Some(status) = statuses.get_mut(&kind) {
                status.active = false;
                status.complete = 0;
                status.total = None;
                status.updated_at = Utc::now();
            }
        }
        self.bump();
    }

    /// Start `kind` and return a guard that finishes it when dropped.
    pub fn begin(&self, kind: StatusKind, total: Option<u64>) -> StatusGuard<'_> {
        self.start(kind, total);
        StatusGuard {
            controller: self,
            kind,
        }
    }

    pub fn get(&self, kind: StatusKind) -> Option<Status> {
        self.read().get(&kind).cloned()
    }

    /// Every known record, sorted by kind.
    pub fn snapshot(&self) -> Vec<Status> {
        let mut statuses: Vec<Status> = self.read().values().cloned().collect();
        statuses.sort_by_key(|s| s.kind);
        statuses
    }

    pub fn active(&self) -> Vec<Status> {
        self.snapshot().into_iter().filter(|s| s.active).collect()
    }

    pub fn reset_all(&self) {
        {
            let now = Utc::now();
            let mut statuses = self.write();
            for status in statuses.values_mut() {
                status.active = false;
                status.complete = 0;
                status.total = None;
                status.updated_at = now;
            }
        }
        self.bump();
    }

    /// Receiver whose value changes on every status transition.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// Finishes its status when dropped, including during unwinding.
#[must_use = "the status is finished as soon as the guard is dropped"]
pub struct StatusGuard<'a> {
    controller: &'a StatusController,
    kind: StatusKind,
}

impl StatusGuard<'_> {
    pub fn update(&self, complete: u64, total: Option<u64>) {
        self.controller.update(self.kind, complete, total);
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.controller.finish(self.kind);
    }
}
