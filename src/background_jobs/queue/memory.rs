use super::{QueueError, Task, TaskQueue};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    closed: bool,
}

/// In-process queue: a `VecDeque` behind a mutex, with a condition variable
/// signalled on every put.
#[derive(Default)]
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskQueue for MemoryTaskQueue {
    fn put(&self, task: Task) -> Result<(), QueueError> {
        let mut state = self.state();
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.tasks.push_back(task);
        self.available.notify_one();
        Ok(())
    }

    fn get(&self, timeout: Option<Duration>) -> Result<Option<Task>, QueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Ok(Some(task));
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    self.available
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn is_empty(&self) -> bool {
        self.state().tasks.is_empty()
    }

    fn len(&self) -> usize {
        self.state().tasks.len()
    }

    fn close(&self) {
        self.state().closed = true;
        self.available.notify_all();
    }

    fn drain(&self) -> Result<Vec<Task>, QueueError> {
        Ok(self.state().tasks.drain(..).collect())
    }
}
