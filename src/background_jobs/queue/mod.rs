//! The task queue: a multi-producer, single-consumer FIFO of [`Task`]s.
//!
//! Two transports share one contract. [`MemoryTaskQueue`] serves a single
//! process; [`SqliteTaskQueue`] is backed by a database file and can be fed
//! from several processes at once.

mod memory;
mod sqlite;

pub use memory::MemoryTaskQueue;
pub use sqlite::{SqliteTaskQueue, DEFAULT_POLL_INTERVAL};

use super::Task;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task queue is closed")]
    Closed,

    /// The payload was removed from the queue but is not a known task.
    #[error("Undecodable task payload (kind {kind}): {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Task queue storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        QueueError::Storage(err.into())
    }
}

pub trait TaskQueue: Send + Sync {
    /// Append a task. Never blocks on the consumer.
    fn put(&self, task: Task) -> Result<(), QueueError>;

    /// Block until a task is available. `Ok(None)` means the timeout elapsed;
    /// `None` as timeout waits indefinitely.
    fn get(&self, timeout: Option<Duration>) -> Result<Option<Task>, QueueError>;

    /// Optimistic snapshot; may be stale as soon as it returns.
    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;

    /// Wake every waiter and reject further puts. Pending tasks stay readable
    /// through [`TaskQueue::drain`].
    fn close(&self);

    /// Remove and return every pending task.
    fn drain(&self) -> Result<Vec<Task>, QueueError>;
}
