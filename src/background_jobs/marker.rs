//! Persisted timestamp of the last cron enqueue cycle.

use crate::server_store::ServerStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const CRON_MARKER_FILE_NAME: &str = "crond.timestamp";
pub const CRON_MARKER_STATE_KEY: &str = "librarian.cron.last_run";

pub trait CronMarker: Send + Sync {
    /// `None` when the cron never ran.
    fn last_run(&self) -> Result<Option<DateTime<Utc>>>;
    fn touch(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Marker file in the cache directory.
///
/// The file holds an RFC 3339 timestamp. A file with unreadable content (for
/// example one created by `touch`) falls back to its modification time.
pub struct FileCronMarker {
    path: PathBuf,
}

impl FileCronMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CRON_MARKER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CronMarker for FileCronMarker {
    fn last_run(&self) -> Result<Option<DateTime<Utc>>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read cron marker {:?}", self.path))
            }
        };

        if let Ok(at) = DateTime::parse_from_rfc3339(content.trim()) {
            return Ok(Some(at.with_timezone(&Utc)));
        }

        debug!(
            "Cron marker {:?} has no timestamp, using its modification time",
            self.path
        );
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat cron marker {:?}", self.path))?;
        Ok(Some(DateTime::<Utc>::from(modified)))
    }

    fn touch(&self, at: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, at.to_rfc3339())
            .with_context(|| format!("Failed to write cron marker {:?}", self.path))
    }
}

/// Marker kept in the server-state key-value store.
pub struct StoreCronMarker {
    server_store: Arc<dyn ServerStore>,
}

impl StoreCronMarker {
    pub fn new(server_store: Arc<dyn ServerStore>) -> Self {
        Self { server_store }
    }
}

impl CronMarker for StoreCronMarker {
    fn last_run(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.server_store.get_state(CRON_MARKER_STATE_KEY)? else {
            return Ok(None);
        };
        let at = DateTime::parse_from_rfc3339(&value)
            .with_context(|| format!("Invalid cron marker value '{}'", value))?;
        Ok(Some(at.with_timezone(&Utc)))
    }

    fn touch(&self, at: DateTime<Utc>) -> Result<()> {
        self.server_store
            .set_state(CRON_MARKER_STATE_KEY, &at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_store::SqliteServerStore;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_file_marker_missing_means_never_run() {
        let temp_dir = TempDir::new().unwrap();
        let marker = FileCronMarker::in_dir(temp_dir.path());
        assert_eq!(marker.last_run().unwrap(), None);
    }

    #[test]
    fn test_file_marker_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let marker = FileCronMarker::in_dir(&temp_dir.path().join("cache"));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 3).unwrap();
        marker.touch(at).unwrap();
        assert_eq!(marker.last_run().unwrap(), Some(at));
    }

    #[test]
    fn test_file_marker_falls_back_to_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let marker = FileCronMarker::in_dir(temp_dir.path());
        std::fs::write(marker.path(), "").unwrap();

        let last_run = marker.last_run().unwrap().unwrap();
        let age = Utc::now() - last_run;
        assert!(age.num_seconds().abs() < 60);
    }

    #[test]
    fn test_store_marker_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());
        let marker = StoreCronMarker::new(store.clone());
        assert_eq!(marker.last_run().unwrap(), None);

        let at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 1).unwrap();
        marker.touch(at).unwrap();
        assert_eq!(marker.last_run().unwrap(), Some(at));
        assert!(store.get_state(CRON_MARKER_STATE_KEY).unwrap().is_some());
    }
}
