mod file_config;

pub use file_config::{FileConfig, LibrarianConfig, SearchConfig};

use crate::background_jobs::{DEFAULT_DEBOUNCE, DEFAULT_QUEUE_POLL_INTERVAL};
use crate::background_jobs::jobs::{DEFAULT_SEARCH_QUERY_TTL_DAYS, MAX_SEARCH_QUERY_TTL_DAYS};
use crate::search::DEFAULT_REMOVE_BATCH_SIZE;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SearchEngine {
    #[default]
    Fts5,
    #[value(name = "noop")]
    NoOp,
}

/// Transport of the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum QueueBackend {
    /// In-process queue; only this process can enqueue.
    #[default]
    Memory,
    /// SQLite file shared with other processes.
    Sqlite,
}

/// Where the cron remembers its last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CronMarkerBackend {
    #[default]
    File,
    Store,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub covers_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub search_engine: SearchEngine,
    pub queue_backend: QueueBackend,
    pub cron_marker: CronMarkerBackend,
    pub skip_startup_tasks: bool,
    pub update_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub covers_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub search_engine: SearchEngine,
    pub librarian: LibrarianSettings,
}

#[derive(Debug, Clone)]
pub struct LibrarianSettings {
    pub queue_backend: QueueBackend,
    pub cron_marker: CronMarkerBackend,
    pub cron_debounce: Duration,
    pub search_query_ttl_days: u64,
    pub index_batch_size: usize,
    pub run_startup_tasks: bool,
    pub update_command: Option<String>,
    pub queue_poll_interval: Duration,
}

impl Default for LibrarianSettings {
    fn default() -> Self {
        Self {
            queue_backend: QueueBackend::default(),
            cron_marker: CronMarkerBackend::default(),
            cron_debounce: DEFAULT_DEBOUNCE,
            search_query_ttl_days: DEFAULT_SEARCH_QUERY_TTL_DAYS,
            index_batch_size: DEFAULT_REMOVE_BATCH_SIZE,
            run_startup_tasks: true,
            update_command: None,
            queue_poll_interval: DEFAULT_QUEUE_POLL_INTERVAL,
        }
    }
}

fn parse_value<T: ValueEnum>(field: &str, value: Option<String>, fallback: T) -> Result<T> {
    match value {
        None => Ok(fallback),
        Some(s) => match T::from_str(&s, true) {
            Ok(parsed) => Ok(parsed),
            Err(_) => bail!("Invalid value '{}' for {}", s, field),
        },
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let cache_dir = file
            .cache_dir
            .map(PathBuf::from)
            .or_else(|| cli.cache_dir.clone())
            .unwrap_or_else(|| db_dir.join("cache"));
        let covers_dir = file
            .covers_dir
            .map(PathBuf::from)
            .or_else(|| cli.covers_dir.clone())
            .unwrap_or_else(|| cache_dir.join("covers"));
        let backup_dir = file
            .backup_dir
            .map(PathBuf::from)
            .or_else(|| cli.backup_dir.clone())
            .unwrap_or_else(|| db_dir.join("backups"));

        let search_engine = parse_value(
            "search.engine",
            file.search.and_then(|s| s.engine),
            cli.search_engine,
        )?;

        let lib_file = file.librarian.unwrap_or_default();
        let defaults = LibrarianSettings::default();
        let librarian = LibrarianSettings {
            queue_backend: parse_value(
                "librarian.queue_backend",
                lib_file.queue_backend,
                cli.queue_backend,
            )?,
            cron_marker: parse_value(
                "librarian.cron_marker",
                lib_file.cron_marker,
                cli.cron_marker,
            )?,
            cron_debounce: lib_file
                .cron_debounce_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cron_debounce),
            search_query_ttl_days: lib_file
                .search_query_ttl_days
                .unwrap_or(defaults.search_query_ttl_days),
            index_batch_size: lib_file
                .index_batch_size
                .unwrap_or(defaults.index_batch_size),
            run_startup_tasks: lib_file
                .run_startup_tasks
                .unwrap_or(!cli.skip_startup_tasks),
            update_command: lib_file
                .update_command
                .or_else(|| cli.update_command.clone())
                .filter(|cmd| !cmd.trim().is_empty()),
            queue_poll_interval: lib_file
                .queue_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue_poll_interval),
        };

        if librarian.index_batch_size == 0 {
            bail!("librarian.index_batch_size must be greater than 0");
        }
        if librarian.queue_poll_interval.is_zero() {
            bail!("librarian.queue_poll_interval_ms must be greater than 0");
        }
        if librarian.search_query_ttl_days > MAX_SEARCH_QUERY_TTL_DAYS {
            bail!(
                "librarian.search_query_ttl_days must be at most {}",
                MAX_SEARCH_QUERY_TTL_DAYS
            );
        }

        Ok(Self {
            db_dir,
            cache_dir,
            covers_dir,
            backup_dir,
            search_engine,
            librarian,
        })
    }

    pub fn library_db_path(&self) -> PathBuf {
        self.db_dir.join("library.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.db_dir.join("task_queue.db")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.cache_dir.join("librarian.prom")
    }
}
