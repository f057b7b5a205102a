//! Test librarian lifecycle management
//!
//! Starts a librarian from a resolved [`AppConfig`] in a temp directory and
//! shuts it down on drop.

use super::constants::*;
use super::fixtures::{create_test_library, seed_search_index};
use chrono::{DateTime, Utc};
use pezzottify_librarian::background_jobs::jobs::{lifecycle_channel, LifecycleReceiver};
use pezzottify_librarian::background_jobs::{CronMarker, FileCronMarker};
use pezzottify_librarian::config::{AppConfig, CliConfig, FileConfig, LibrarianConfig};
use pezzottify_librarian::library_store::{RecordId, SqliteLibraryStore};
use pezzottify_librarian::Librarian;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub struct TestLibrarianBuilder {
    run_startup_tasks: bool,
    update_command: Option<String>,
    stale_index_entries: Vec<RecordId>,
    cron_last_run: DateTime<Utc>,
}

impl TestLibrarianBuilder {
    /// Skip the startup index update.
    pub fn idle(mut self) -> Self {
        self.run_startup_tasks = false;
        self
    }

    pub fn update_command(mut self, command: &str) -> Self {
        self.update_command = Some(command.to_string());
        self
    }

    /// Index documents for records that are not in the library.
    pub fn stale_index_entries(mut self, record_ids: &[RecordId]) -> Self {
        self.stale_index_entries = record_ids.to_vec();
        self
    }

    /// Date the cron marker two days back so maintenance is overdue at start.
    pub fn cron_overdue(mut self) -> Self {
        self.cron_last_run = Utc::now() - chrono::Duration::days(2);
        self
    }

    pub fn spawn(self) -> TestLibrarian {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_dir = temp_dir.path().to_path_buf();
        let record_ids = create_test_library(&db_dir);
        if !self.stale_index_entries.is_empty() {
            seed_search_index(&db_dir, &self.stale_index_entries);
        }

        let cli = CliConfig {
            db_dir: Some(db_dir.clone()),
            skip_startup_tasks: !self.run_startup_tasks,
            update_command: self.update_command,
            ..Default::default()
        };
        let file_config = FileConfig {
            librarian: Some(LibrarianConfig {
                cron_debounce_secs: Some(0),
                queue_poll_interval_ms: Some(POLL_INTERVAL_MS),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, Some(file_config)).expect("Failed to resolve config");

        std::fs::create_dir_all(&config.cache_dir).expect("Failed to create cache dir");
        let marker = FileCronMarker::in_dir(&config.cache_dir);
        marker
            .touch(self.cron_last_run)
            .expect("Failed to write cron marker");

        let (lifecycle_tx, lifecycle) = lifecycle_channel();
        let librarian =
            Librarian::from_config(&config, lifecycle_tx).expect("Failed to start librarian");
        let store = SqliteLibraryStore::new(config.library_db_path())
            .expect("Failed to open library store");

        TestLibrarian {
            librarian,
            lifecycle,
            store,
            marker,
            record_ids,
            covers_dir: config.covers_dir.clone(),
            backup_dir: config.backup_dir.clone(),
            _temp_dir: temp_dir,
        }
    }
}

/// A running librarian with isolated databases.
///
/// Dropping it shuts the librarian down before the temp dir is removed.
pub struct TestLibrarian {
    pub librarian: Librarian,
    pub lifecycle: LifecycleReceiver,
    /// Second handle on the librarian's library database.
    pub store: SqliteLibraryStore,
    pub marker: FileCronMarker,
    pub record_ids: Vec<RecordId>,
    pub covers_dir: PathBuf,
    pub backup_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestLibrarian {
    pub fn builder() -> TestLibrarianBuilder {
        TestLibrarianBuilder {
            run_startup_tasks: true,
            update_command: None,
            stale_index_entries: Vec::new(),
            cron_last_run: Utc::now(),
        }
    }

    /// Record ids the search index currently holds.
    pub fn indexed_record_ids(&self) -> BTreeSet<RecordId> {
        let index = &self.librarian.context().search_index;
        if !index.is_setup_complete() {
            return BTreeSet::new();
        }
        index
            .all_documents()
            .expect("Failed to list index documents")
            .into_iter()
            .filter_map(|doc| doc.record_id)
            .collect()
    }

    pub fn library_record_ids(&self) -> BTreeSet<RecordId> {
        self.record_ids.iter().copied().collect()
    }

    /// Poll `condition` until it holds, panicking after the settle timeout.
    pub fn wait_until(&self, what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_millis(SETTLE_TIMEOUT_MS);
        while !condition() {
            if Instant::now() > deadline {
                panic!("Timed out waiting for {what}");
            }
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }
}

impl Drop for TestLibrarian {
    fn drop(&mut self) {
        self.librarian.shutdown();
    }
}
