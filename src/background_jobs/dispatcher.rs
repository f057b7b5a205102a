//! The single consumer of the task queue.

use super::cron::CronScheduler;
use super::queue::{QueueError, TaskQueue};
use super::task::{BookmarkUpdate, Task};
use crate::metrics;
use anyhow::Result;
use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// One handler per maintenance task.
pub trait MaintenanceHandlers: Send + Sync {
    fn clean_foreign_keys(&self) -> Result<()>;
    fn clean_search_queries(&self) -> Result<()>;
    fn vacuum_database(&self) -> Result<()>;
    fn backup_database(&self) -> Result<()>;
    fn update_application(&self, force: bool) -> Result<()>;
    fn restart_application(&self) -> Result<()>;
    fn update_search_index(&self, force: bool) -> Result<()>;
    fn remove_stale_search_entries(&self) -> Result<()>;
    fn remove_orphan_covers(&self) -> Result<()>;
    fn update_bookmarks(&self, update: &BookmarkUpdate) -> Result<()>;
    fn update_user_active(&self, user_id: i64) -> Result<()>;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Pulls tasks off the queue one at a time and runs their handler.
///
/// A failing or panicking handler is logged and the loop moves on to the next
/// task. The loop ends on [`Task::Shutdown`] or when the queue is closed.
pub struct MaintenanceDispatcher {
    queue: Arc<dyn TaskQueue>,
    handlers: Arc<dyn MaintenanceHandlers>,
    cron: Option<Arc<CronScheduler>>,
}

impl MaintenanceDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, handlers: Arc<dyn MaintenanceHandlers>) -> Self {
        Self {
            queue,
            handlers,
            cron: None,
        }
    }

    pub fn with_cron(mut self, cron: Arc<CronScheduler>) -> Self {
        self.cron = Some(cron);
        self
    }

    fn isolate(&self, kind: &'static str, handler: impl FnOnce() -> Result<()>) {
        let start = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(handler)) {
            Ok(Ok(())) => "ok",
            Ok(Err(err)) => {
                error!("Task {} failed: {:#}", kind, err);
                "error"
            }
            Err(payload) => {
                error!("Task {} panicked: {}", kind, panic_message(payload.as_ref()));
                "panic"
            }
        };
        let elapsed = start.elapsed();
        debug!("Task {} finished ({}) in {:?}", kind, outcome, elapsed);
        metrics::record_task(kind, outcome, elapsed);
    }

    /// Run one task. Breaks when the task asks the loop to end.
    pub fn process(&self, task: Task) -> ControlFlow<()> {
        let handlers = self.handlers.as_ref();
        let kind = task.kind();
        match task {
            Task::Shutdown => {
                info!("Dispatcher received shutdown");
                return ControlFlow::Break(());
            }
            Task::WakeCron => match &self.cron {
                Some(cron) => cron.wake(),
                None => warn!("Received {} but no cron scheduler is attached", kind),
            },
            Task::CleanForeignKeys => self.isolate(kind, || handlers.clean_foreign_keys()),
            Task::CleanSearchQueries => self.isolate(kind, || handlers.clean_search_queries()),
            Task::VacuumDatabase => self.isolate(kind, || handlers.vacuum_database()),
            Task::BackupDatabase => self.isolate(kind, || handlers.backup_database()),
            Task::UpdateApplication { force } => {
                self.isolate(kind, || handlers.update_application(force))
            }
            Task::RestartApplication => self.isolate(kind, || handlers.restart_application()),
            Task::SearchIndexUpdate { force } => {
                self.isolate(kind, || handlers.update_search_index(force))
            }
            Task::SearchIndexRemoveStale => {
                self.isolate(kind, || handlers.remove_stale_search_entries())
            }
            Task::RemoveOrphanCovers => self.isolate(kind, || handlers.remove_orphan_covers()),
            Task::BookmarkUpdate(update) => {
                self.isolate(kind, || handlers.update_bookmarks(&update))
            }
            Task::UserActiveUpdate { user_id } => {
                self.isolate(kind, || handlers.update_user_active(user_id))
            }
        }
        ControlFlow::Continue(())
    }

    pub fn run(&self) {
        info!("Dispatcher ready for tasks");
        loop {
            match self.queue.get(None) {
                Ok(Some(task)) => {
                    debug!("Processing task {}", task.kind());
                    if self.process(task).is_break() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(QueueError::Decode { kind, source }) => {
                    warn!("Dropping unknown task {}: {}", kind, source);
                    metrics::record_task("unknown", "dropped", Duration::ZERO);
                }
                Err(QueueError::Closed) => {
                    info!("Task queue closed");
                    break;
                }
                Err(err) => {
                    error!("Failed to read from task queue: {}", err);
                    thread::sleep(QUEUE_ERROR_BACKOFF);
                }
            }
        }
        info!("Dispatcher stopped");
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("librarian-dispatcher".to_string())
            .spawn(move || self.run())
    }
}
