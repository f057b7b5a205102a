use crate::library_store::{AuthFilter, BookmarkFields, RecordId};
use serde::{Deserialize, Serialize};

/// Payload of [`Task::BookmarkUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkUpdate {
    pub auth_filter: AuthFilter,
    pub record_ids: Vec<RecordId>,
    pub updates: BookmarkFields,
}

/// A unit of background work.
///
/// Tasks are immutable values: producers create them, the dispatcher consumes
/// each one exactly once. They serialize with an internal `type` tag so they
/// can travel through the cross-process queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    CleanForeignKeys,
    CleanSearchQueries,
    VacuumDatabase,
    BackupDatabase,
    UpdateApplication { force: bool },
    RestartApplication,
    SearchIndexUpdate { force: bool },
    SearchIndexRemoveStale,
    RemoveOrphanCovers,
    BookmarkUpdate(BookmarkUpdate),
    UserActiveUpdate { user_id: i64 },
    /// End the cron scheduler's current wait and run maintenance now.
    WakeCron,
    /// Make the dispatcher leave its loop.
    Shutdown,
}

impl Task {
    /// Stable name used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Task::CleanForeignKeys => "clean_foreign_keys",
            Task::CleanSearchQueries => "clean_search_queries",
            Task::VacuumDatabase => "vacuum_database",
            Task::BackupDatabase => "backup_database",
            Task::UpdateApplication { .. } => "update_application",
            Task::RestartApplication => "restart_application",
            Task::SearchIndexUpdate { .. } => "search_index_update",
            Task::SearchIndexRemoveStale => "search_index_remove_stale",
            Task::RemoveOrphanCovers => "remove_orphan_covers",
            Task::BookmarkUpdate(_) => "bookmark_update",
            Task::UserActiveUpdate { .. } => "user_active_update",
            Task::WakeCron => "wake_cron",
            Task::Shutdown => "shutdown",
        }
    }
}

/// The batch the cron scheduler enqueues every night, in order.
pub fn nightly_maintenance_tasks() -> Vec<Task> {
    vec![
        Task::CleanForeignKeys,
        Task::CleanSearchQueries,
        Task::VacuumDatabase,
        Task::BackupDatabase,
        Task::UpdateApplication { force: false },
        Task::SearchIndexUpdate { force: false },
        Task::RemoveOrphanCovers,
    ]
}

/// Tasks enqueued once when the librarian starts.
pub fn startup_tasks() -> Vec<Task> {
    vec![Task::SearchIndexUpdate { force: false }]
}
