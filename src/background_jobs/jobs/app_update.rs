//! Self-update through an external command, and restart requests.
//!
//! The update command runs through `sh -c` with `LIBRARIAN_UPDATE_FORCE` set
//! to `1` or `0`. Exit code 0 means an update was installed and the process
//! should restart; [`UP_TO_DATE_EXIT_CODE`] means there was nothing to do.
//! Anything else is a failure.

use crate::background_jobs::{StatusController, StatusKind, Task, TaskQueue};
use anyhow::{bail, Context, Result};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const UP_TO_DATE_EXIT_CODE: i32 = 3;
pub const UPDATE_FORCE_ENV: &str = "LIBRARIAN_UPDATE_FORCE";

/// What the binary's main loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    Run,
    Restart,
}

pub type LifecycleSender = watch::Sender<LifecycleRequest>;
pub type LifecycleReceiver = watch::Receiver<LifecycleRequest>;

pub fn lifecycle_channel() -> (LifecycleSender, LifecycleReceiver) {
    watch::channel(LifecycleRequest::Run)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Disabled,
    UpToDate,
    Updated,
}

pub struct ApplicationUpdater {
    update_command: Option<String>,
    queue: Arc<dyn TaskQueue>,
    statuses: Arc<StatusController>,
    lifecycle: LifecycleSender,
}

impl ApplicationUpdater {
    pub fn new(
        update_command: Option<String>,
        queue: Arc<dyn TaskQueue>,
        statuses: Arc<StatusController>,
        lifecycle: LifecycleSender,
    ) -> Self {
        Self {
            update_command,
            queue,
            statuses,
            lifecycle,
        }
    }

    /// Run the update command. A successful install queues a restart.
    pub fn update(&self, force: bool) -> Result<UpdateOutcome> {
        let Some(command) = self.update_command.as_deref() else {
            debug!("No update command configured, self-update is disabled");
            return Ok(UpdateOutcome::Disabled);
        };
        let outcome = {
            let _guard = self.statuses.begin(StatusKind::JanitorUpdate, None);
            info!("Checking for application update (force: {})", force);
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .env(UPDATE_FORCE_ENV, if force { "1" } else { "0" })
                .output()
                .with_context(|| format!("Failed to run update command '{}'", command))?;

            match output.status.code() {
                Some(0) => UpdateOutcome::Updated,
                Some(UP_TO_DATE_EXIT_CODE) => UpdateOutcome::UpToDate,
                code => bail!(
                    "Update command exited with {:?}: {}",
                    code,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
        };

        match outcome {
            UpdateOutcome::Updated => {
                info!("Application updated, requesting restart");
                self.queue.put(Task::RestartApplication)?;
            }
            _ => info!("Application is up to date"),
        }
        Ok(outcome)
    }

    pub fn restart(&self) -> Result<()> {
        info!("Restart requested");
        if self.lifecycle.send(LifecycleRequest::Restart).is_err() {
            warn!("Nobody is listening for restart requests");
        }
        Ok(())
    }
}
