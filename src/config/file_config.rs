use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub covers_dir: Option<String>,
    pub backup_dir: Option<String>,

    // Feature configs
    pub search: Option<SearchConfig>,
    pub librarian: Option<LibrarianConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Search engine to use: "fts5", "noop"
    pub engine: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LibrarianConfig {
    /// "memory" or "sqlite"
    pub queue_backend: Option<String>,
    /// "file" or "store"
    pub cron_marker: Option<String>,
    pub cron_debounce_secs: Option<u64>,
    pub search_query_ttl_days: Option<u64>,
    pub index_batch_size: Option<usize>,
    pub run_startup_tasks: Option<bool>,
    pub update_command: Option<String>,
    pub queue_poll_interval_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
