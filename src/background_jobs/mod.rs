//! Background maintenance: the task queue, its dispatcher, the nightly cron
//! and the status registry that reports their progress.

mod context;
mod cron;
mod dispatcher;
pub mod jobs;
mod marker;
mod queue;
mod status;
mod task;

pub use context::{HandlerSettings, LibrarianContext, LibrarianHandlers};
pub use cron::{time_until_next_midnight, CronScheduler, DEFAULT_DEBOUNCE};
pub use dispatcher::{MaintenanceDispatcher, MaintenanceHandlers};
pub use marker::{
    CronMarker, FileCronMarker, StoreCronMarker, CRON_MARKER_FILE_NAME, CRON_MARKER_STATE_KEY,
};
pub use queue::{
    MemoryTaskQueue, QueueError, SqliteTaskQueue, TaskQueue,
    DEFAULT_POLL_INTERVAL as DEFAULT_QUEUE_POLL_INTERVAL,
};
pub use status::{Status, StatusController, StatusGuard, StatusKind};
pub use task::{nightly_maintenance_tasks, startup_tasks, BookmarkUpdate, Task};
