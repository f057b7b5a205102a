use super::{QueueError, Task, TaskQueue};
use crate::sqlite_column;
use crate::sqlite_persistence::{
    open_versioned_db, Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const TASK_QUEUE_TABLE_V1: Table = Table {
    name: "task_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!(
            "enqueued_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const TASK_QUEUE_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[TASK_QUEUE_TABLE_V1],
    migration: None,
}];

#[derive(Default)]
struct Signal {
    closed: bool,
    /// Bumped by every local put so a consumer never sleeps past one.
    puts: u64,
}

/// Queue stored in a SQLite file, one row per task.
///
/// Any process that opens the same file can put; one consumer pops. Local puts
/// wake the consumer right away, puts from other processes are noticed within
/// the poll interval.
pub struct SqliteTaskQueue {
    conn: Mutex<Connection>,
    signal: Mutex<Signal>,
    available: Condvar,
    poll_interval: Duration,
}

impl SqliteTaskQueue {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        Self::with_poll_interval(db_path, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(db_path: &Path, poll_interval: Duration) -> anyhow::Result<Self> {
        let conn = open_versioned_db(db_path, TASK_QUEUE_SCHEMAS, "task queue")?;
        Ok(Self {
            conn: Mutex::new(conn),
            signal: Mutex::new(Signal::default()),
            available: Condvar::new(),
            poll_interval,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self) -> rusqlite::Result<usize> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM task_queue", [], |r| r.get::<_, i64>(0))
            .map(|count| count as usize)
    }

    fn signal(&self) -> MutexGuard<'_, Signal> {
        self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_pop(&self) -> Result<Option<Task>, QueueError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT id, kind, payload FROM task_queue ORDER BY id LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((id, kind, payload)) = row else {
            return Ok(None);
        };
        tx.execute("DELETE FROM task_queue WHERE id = ?1", params![id])?;
        tx.commit()?;

        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|source| QueueError::Decode { kind, source })
    }
}

impl TaskQueue for SqliteTaskQueue {
    fn put(&self, task: Task) -> Result<(), QueueError> {
        if self.signal().closed {
            return Err(QueueError::Closed);
        }
        let payload = serde_json::to_string(&task).map_err(anyhow::Error::from)?;
        self.conn().execute(
            "INSERT INTO task_queue (kind, payload) VALUES (?1, ?2)",
            params![task.kind(), payload],
        )?;

        self.signal().puts += 1;
        self.available.notify_one();
        Ok(())
    }

    fn get(&self, timeout: Option<Duration>) -> Result<Option<Task>, QueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let seen_puts = self.signal().puts;
            if let Some(task) = self.try_pop()? {
                return Ok(Some(task));
            }

            let mut signal = self.signal();
            if signal.closed {
                return Err(QueueError::Closed);
            }
            let mut wait = self.poll_interval;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                wait = wait.min(remaining);
            }
            if signal.puts == seen_puts {
                signal = self
                    .available
                    .wait_timeout(signal, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            drop(signal);
        }
    }

    /// A storage error counts as not empty.
    fn is_empty(&self) -> bool {
        match self.count() {
            Ok(count) => count == 0,
            Err(err) => {
                warn!("Failed to check whether the task queue is empty: {}", err);
                false
            }
        }
    }

    fn len(&self) -> usize {
        self.count().unwrap_or_else(|err| {
            debug!("Failed to count queued tasks: {}", err);
            0
        })
    }

    fn close(&self) {
        self.signal().closed = true;
        self.available.notify_all();
    }

    fn drain(&self) -> Result<Vec<Task>, QueueError> {
        let mut drained = Vec::new();
        loop {
            match self.try_pop() {
                Ok(Some(task)) => drained.push(task),
                Ok(None) => return Ok(drained),
                Err(QueueError::Decode { kind, .. }) => {
                    debug!("Dropping undecodable task of kind {} while draining", kind);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
