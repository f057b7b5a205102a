//! Database housekeeping: vacuum, backup and cleanup of dangling rows.

use crate::background_jobs::{StatusController, StatusKind};
use crate::library_store::{LibraryStore, OrphanCleanupReport};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const BACKUP_FILE_NAME: &str = "library.db.backup";
pub const DEFAULT_SEARCH_QUERY_TTL_DAYS: u64 = 7;
/// Longer TTLs are clamped here.
pub const MAX_SEARCH_QUERY_TTL_DAYS: u64 = 36_500;

pub struct Janitor {
    library_store: Arc<dyn LibraryStore>,
    statuses: Arc<StatusController>,
    backup_dir: PathBuf,
    search_query_ttl: chrono::Duration,
}

impl Janitor {
    pub fn new(
        library_store: Arc<dyn LibraryStore>,
        statuses: Arc<StatusController>,
        backup_dir: PathBuf,
        search_query_ttl_days: u64,
    ) -> Self {
        Self {
            library_store,
            statuses,
            backup_dir,
            search_query_ttl: chrono::Duration::days(
                search_query_ttl_days.min(MAX_SEARCH_QUERY_TTL_DAYS) as i64,
            ),
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir.join(BACKUP_FILE_NAME)
    }

    pub fn vacuum_database(&self) -> Result<u64> {
        let _guard = self.statuses.begin(StatusKind::JanitorVacuum, None);
        let report = self.library_store.vacuum()?;
        let saved = report.bytes_saved();
        info!(
            "Vacuumed database: {} -> {} bytes, saved {} bytes",
            report.bytes_before, report.bytes_after, saved
        );
        Ok(saved)
    }

    /// Write a fresh backup next to the previous one and swap it in.
    pub fn backup_database(&self) -> Result<PathBuf> {
        let _guard = self.statuses.begin(StatusKind::JanitorBackup, None);
        std::fs::create_dir_all(&self.backup_dir)
            .with_context(|| format!("Failed to create backup dir {:?}", self.backup_dir))?;

        let backup_path = self.backup_path();
        let tmp_path = backup_path.with_extension("backup.tmp");
        remove_if_exists(&tmp_path)?;

        self.library_store.backup_to(&tmp_path)?;
        std::fs::rename(&tmp_path, &backup_path)
            .with_context(|| format!("Failed to move backup into {:?}", backup_path))?;
        info!("Backed up database to {:?}", backup_path);
        Ok(backup_path)
    }

    pub fn clean_foreign_keys(&self) -> Result<OrphanCleanupReport> {
        let _guard = self.statuses.begin(StatusKind::JanitorCleanForeignKeys, None);
        let report = self.library_store.clean_orphans()?;
        if report.total() > 0 {
            info!(
                "Cleaned up {} tag links, {} tags and {} bookmarks with missing references",
                report.tag_links, report.tags, report.bookmarks
            );
        } else {
            debug!("No dangling rows to clean up");
        }
        Ok(report)
    }

    pub fn clean_search_queries(&self) -> Result<usize> {
        let _guard = self
            .statuses
            .begin(StatusKind::JanitorCleanSearchQueries, None);
        let cutoff = Utc::now() - self.search_query_ttl;
        let deleted = self.library_store.clean_search_queries(cutoff)?;
        if deleted > 0 {
            info!("Cleaned up {} unused search queries", deleted);
        } else {
            debug!("No unused search queries to clean up");
        }
        Ok(deleted)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {:?}", path)),
    }
}
