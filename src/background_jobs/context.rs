use super::dispatcher::MaintenanceHandlers;
use super::jobs::{
    ApplicationUpdater, BookmarkWriter, CoverJanitor, Janitor, LifecycleSender,
};
use super::queue::TaskQueue;
use super::status::StatusController;
use super::task::BookmarkUpdate;
use crate::library_store::LibraryStore;
use crate::search::{SearchIndex, SearchIndexReconciler, SearchIndexer};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared resources every maintenance handler works against.
#[derive(Clone)]
pub struct LibrarianContext {
    pub queue: Arc<dyn TaskQueue>,
    pub statuses: Arc<StatusController>,
    pub library_store: Arc<dyn LibraryStore>,
    pub search_index: Arc<dyn SearchIndex>,
    pub lifecycle: LifecycleSender,
}

/// Tunables for the handlers, filled from the `[librarian]` config section.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub backup_dir: PathBuf,
    pub covers_dir: PathBuf,
    pub search_query_ttl_days: u64,
    pub index_batch_size: usize,
    pub update_command: Option<String>,
}

/// The production [`MaintenanceHandlers`]: each task is routed to the job
/// that owns it.
pub struct LibrarianHandlers {
    janitor: Janitor,
    covers: CoverJanitor,
    bookmarks: BookmarkWriter,
    updater: ApplicationUpdater,
    indexer: SearchIndexer,
    reconciler: SearchIndexReconciler,
}

impl LibrarianHandlers {
    pub fn new(ctx: &LibrarianContext, settings: &HandlerSettings) -> Self {
        Self {
            janitor: Janitor::new(
                ctx.library_store.clone(),
                ctx.statuses.clone(),
                settings.backup_dir.clone(),
                settings.search_query_ttl_days,
            ),
            covers: CoverJanitor::new(
                ctx.library_store.clone(),
                ctx.statuses.clone(),
                settings.covers_dir.clone(),
            ),
            bookmarks: BookmarkWriter::new(ctx.library_store.clone()),
            updater: ApplicationUpdater::new(
                settings.update_command.clone(),
                ctx.queue.clone(),
                ctx.statuses.clone(),
                ctx.lifecycle.clone(),
            ),
            indexer: SearchIndexer::new(
                ctx.library_store.clone(),
                ctx.search_index.clone(),
                ctx.queue.clone(),
                ctx.statuses.clone(),
            )
            .with_batch_size(settings.index_batch_size),
            reconciler: SearchIndexReconciler::new(
                ctx.library_store.clone(),
                ctx.search_index.clone(),
                ctx.queue.clone(),
                ctx.statuses.clone(),
            )
            .with_batch_size(settings.index_batch_size),
        }
    }
}

impl MaintenanceHandlers for LibrarianHandlers {
    fn clean_foreign_keys(&self) -> Result<()> {
        self.janitor.clean_foreign_keys().map(|_| ())
    }

    fn clean_search_queries(&self) -> Result<()> {
        self.janitor.clean_search_queries().map(|_| ())
    }

    fn vacuum_database(&self) -> Result<()> {
        self.janitor.vacuum_database().map(|_| ())
    }

    fn backup_database(&self) -> Result<()> {
        self.janitor.backup_database().map(|_| ())
    }

    fn update_application(&self, force: bool) -> Result<()> {
        self.updater.update(force).map(|_| ())
    }

    fn restart_application(&self) -> Result<()> {
        self.updater.restart()
    }

    fn update_search_index(&self, force: bool) -> Result<()> {
        self.indexer.update(force).map(|_| ())
    }

    // Aborts and failures are logged by the reconciler itself.
    fn remove_stale_search_entries(&self) -> Result<()> {
        self.reconciler.run();
        Ok(())
    }

    fn remove_orphan_covers(&self) -> Result<()> {
        self.covers.remove_orphan_covers().map(|_| ())
    }

    fn update_bookmarks(&self, update: &BookmarkUpdate) -> Result<()> {
        self.bookmarks.update_bookmarks(update).map(|_| ())
    }

    fn update_user_active(&self, user_id: i64) -> Result<()> {
        self.bookmarks.update_user_active(user_id).map(|_| ())
    }
}
