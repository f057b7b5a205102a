//! The librarian daemon: wires the queue, the dispatcher thread and the cron
//! scheduler together and tears them down in order.

use crate::background_jobs::jobs::LifecycleSender;
use crate::background_jobs::{
    startup_tasks, CronMarker, CronScheduler, FileCronMarker, HandlerSettings, LibrarianContext,
    LibrarianHandlers, MaintenanceDispatcher, MaintenanceHandlers, MemoryTaskQueue, QueueError,
    SqliteTaskQueue, StatusController, StoreCronMarker, Task, TaskQueue,
};
use crate::config::{AppConfig, CronMarkerBackend, QueueBackend};
use crate::library_store::SqliteLibraryStore;
use crate::search::create_search_index;
use crate::server_store::SqliteServerStore;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct LibrarianOptions {
    pub handlers: HandlerSettings,
    pub cron_debounce: Duration,
    pub run_startup_tasks: bool,
}

pub struct Librarian {
    ctx: LibrarianContext,
    cron: Arc<CronScheduler>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Librarian {
    /// Open every store named by `config` and start the daemon.
    pub fn from_config(config: &AppConfig, lifecycle: LifecycleSender) -> Result<Self> {
        for dir in [&config.cache_dir, &config.covers_dir, &config.backup_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        let settings = &config.librarian;

        info!("Opening library database at {:?}", config.library_db_path());
        let library_store = Arc::new(SqliteLibraryStore::new(config.library_db_path())?);
        let search_index = create_search_index(&config.search_engine, &config.db_dir)?;

        let queue: Arc<dyn TaskQueue> = match settings.queue_backend {
            QueueBackend::Memory => Arc::new(MemoryTaskQueue::new()),
            QueueBackend::Sqlite => {
                info!("Opening task queue at {:?}", config.queue_db_path());
                Arc::new(SqliteTaskQueue::with_poll_interval(
                    &config.queue_db_path(),
                    settings.queue_poll_interval,
                )?)
            }
        };

        let marker: Arc<dyn CronMarker> = match settings.cron_marker {
            CronMarkerBackend::File => Arc::new(FileCronMarker::in_dir(&config.cache_dir)),
            CronMarkerBackend::Store => Arc::new(StoreCronMarker::new(Arc::new(
                SqliteServerStore::new(config.server_db_path())?,
            ))),
        };

        let ctx = LibrarianContext {
            queue,
            statuses: Arc::new(StatusController::new()),
            library_store,
            search_index,
            lifecycle,
        };
        let options = LibrarianOptions {
            handlers: HandlerSettings {
                backup_dir: config.backup_dir.clone(),
                covers_dir: config.covers_dir.clone(),
                search_query_ttl_days: settings.search_query_ttl_days,
                index_batch_size: settings.index_batch_size,
                update_command: settings.update_command.clone(),
            },
            cron_debounce: settings.cron_debounce,
            run_startup_tasks: settings.run_startup_tasks,
        };
        Self::start(ctx, marker, options)
    }

    pub fn start(
        ctx: LibrarianContext,
        marker: Arc<dyn CronMarker>,
        options: LibrarianOptions,
    ) -> Result<Self> {
        let handlers = Arc::new(LibrarianHandlers::new(&ctx, &options.handlers));
        Self::start_with_handlers(ctx, marker, handlers, options)
    }

    pub fn start_with_handlers(
        ctx: LibrarianContext,
        marker: Arc<dyn CronMarker>,
        handlers: Arc<dyn MaintenanceHandlers>,
        options: LibrarianOptions,
    ) -> Result<Self> {
        // A previous run may have died mid-task.
        ctx.statuses.reset_all();

        if options.run_startup_tasks {
            for task in startup_tasks() {
                debug!("Enqueueing startup task {}", task.kind());
                ctx.queue.put(task)?;
            }
        }

        let cron = Arc::new(CronScheduler::new(
            ctx.queue.clone(),
            marker,
            options.cron_debounce,
        ));
        let dispatcher = MaintenanceDispatcher::new(ctx.queue.clone(), handlers)
            .with_cron(cron.clone())
            .spawn()
            .context("Failed to spawn dispatcher thread")?;
        cron.start().context("Failed to spawn cron thread")?;

        info!("Librarian started");
        Ok(Self {
            ctx,
            cron,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn context(&self) -> &LibrarianContext {
        &self.ctx
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.ctx.queue
    }

    pub fn statuses(&self) -> &Arc<StatusController> {
        &self.ctx.statuses
    }

    pub fn cron(&self) -> &Arc<CronScheduler> {
        &self.cron
    }

    /// Stop the cron and the dispatcher, then throw away whatever is still
    /// queued. Returns the number of dropped tasks. Only the first call does
    /// any work.
    pub fn shutdown(&self) -> usize {
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(dispatcher) = dispatcher else {
            return 0;
        };

        info!("Shutting down librarian");
        self.cron.stop();

        match self.ctx.queue.put(Task::Shutdown) {
            Ok(()) => {}
            Err(QueueError::Closed) => debug!("Task queue already closed"),
            Err(err) => {
                // The dispatcher would never see the shutdown task.
                error!("Failed to enqueue shutdown: {}", err);
                self.ctx.queue.close();
            }
        }
        if dispatcher.join().is_err() {
            error!("Dispatcher thread panicked");
        }

        self.ctx.queue.close();
        let dropped = match self.ctx.queue.drain() {
            Ok(tasks) => tasks.len(),
            Err(err) => {
                warn!("Failed to drain task queue: {}", err);
                0
            }
        };
        if dropped > 0 {
            warn!("Dropped {} pending tasks on shutdown", dropped);
        }

        self.ctx.statuses.reset_all();
        info!("Librarian stopped");
        dropped
    }
}

impl Drop for Librarian {
    fn drop(&mut self) {
        self.shutdown();
    }
}
