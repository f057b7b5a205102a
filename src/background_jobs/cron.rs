//! Midnight-aligned maintenance scheduler.
//!
//! A dedicated thread sleeps on a condition variable until the next local
//! midnight, enqueues the nightly maintenance batch, writes the cron marker and
//! goes back to sleep. The marker keeps a restart from running the batch twice
//! in one day, and makes an overdue batch fire right away.

use super::marker::CronMarker;
use super::queue::TaskQueue;
use super::task::nightly_maintenance_tasks;
use crate::metrics;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

fn one_day() -> chrono::Duration {
    chrono::Duration::days(1)
}

/// Midnight at the start of `date` in `tz`. When that instant does not exist
/// (a DST gap), the first valid instant after it is used.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..=3)
        .find_map(|hours| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(hours)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Time to wait before the next maintenance batch.
///
/// Without a previous run, the last run is taken to be the most recent
/// midnight. If the last run is less than a day old the wait lasts until the
/// next midnight, otherwise maintenance is overdue and the wait is zero.
pub fn time_until_next_midnight<Tz: TimeZone>(
    now: DateTime<Tz>,
    last_run: Option<DateTime<Utc>>,
) -> Duration {
    let tz = now.timezone();
    let today = now.date_naive();
    let now = now.with_timezone(&Utc);
    let last_run = last_run.unwrap_or_else(|| local_midnight(&tz, today));

    if now.signed_duration_since(last_run) < one_day() {
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
        let next_midnight = local_midnight(&tz, tomorrow);
        next_midnight
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

#[derive(Default)]
struct CronFlags {
    stop: bool,
    wake: bool,
}

struct CronShared {
    queue: Arc<dyn TaskQueue>,
    marker: Arc<dyn CronMarker>,
    debounce: Duration,
    flags: Mutex<CronFlags>,
    cond: Condvar,
}

impl CronShared {
    fn flags(&self) -> MutexGuard<'_, CronFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeout(&self) -> Duration {
        let last_run = self.marker.last_run().unwrap_or_else(|err| {
            error!("Failed to read cron marker: {:#}", err);
            None
        });
        time_until_next_midnight(chrono::Local::now(), last_run)
    }

    /// Wait until `timeout` elapses or a wake request arrives. Returns false
    /// when stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags();
        loop {
            if flags.stop {
                return false;
            }
            if flags.wake {
                flags.wake = false;
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            flags = self
                .cond
                .wait_timeout(flags, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Sleep for the debounce period. Only stop interrupts it.
    fn debounce(&self) -> bool {
        let deadline = Instant::now() + self.debounce;
        let mut flags = self.flags();
        while !flags.stop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            flags = self
                .cond
                .wait_timeout(flags, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        false
    }

    fn fire(&self) {
        let mut enqueued = 0;
        for task in nightly_maintenance_tasks() {
            let kind = task.kind();
            match self.queue.put(task) {
                Ok(()) => enqueued += 1,
                Err(err) => error!("Cron failed to enqueue {}: {}", kind, err),
            }
        }
        metrics::record_cron_cycle(enqueued);
        info!("Cron enqueued {} maintenance tasks", enqueued);

        if let Err(err) = self.marker.touch(Utc::now()) {
            error!("Failed to write cron marker: {:#}", err);
        }
    }

    fn run(&self) {
        info!("Started cron scheduler");
        loop {
            let timeout = self.timeout();
            debug!("Waiting {:?} until next maintenance", timeout);
            if !self.wait(timeout) {
                break;
            }
            self.fire();
            if !self.debounce() {
                break;
            }
        }
        info!("Stopped cron scheduler");
    }
}

/// Owns the cron thread. States: idle before [`CronScheduler::start`],
/// running until [`CronScheduler::stop`], then stopped for good.
pub struct CronScheduler {
    shared: Arc<CronShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CronScheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        marker: Arc<dyn CronMarker>,
        debounce: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(CronShared {
                queue,
                marker,
                debounce,
                flags: Mutex::new(CronFlags::default()),
                cond: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    fn handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the cron thread. Calling it again, or after stop, does nothing.
    pub fn start(&self) -> std::io::Result<()> {
        let mut handle = self.handle();
        if handle.is_some() {
            debug!("Cron scheduler already started");
            return Ok(());
        }
        if self.shared.flags().stop {
            warn!("Cron scheduler was stopped, not starting it again");
            return Ok(());
        }
        let shared = self.shared.clone();
        *handle = Some(
            thread::Builder::new()
                .name("librarian-cron".to_string())
                .spawn(move || shared.run())?,
        );
        Ok(())
    }

    /// Run the maintenance batch now instead of at midnight.
    pub fn wake(&self) {
        self.shared.flags().wake = true;
        self.shared.cond.notify_all();
    }

    /// Stop the thread and wait for it. Safe to call repeatedly and before
    /// start.
    pub fn stop(&self) {
        self.shared.flags().stop = true;
        self.shared.cond.notify_all();
        let handle = self.handle().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Cron thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
