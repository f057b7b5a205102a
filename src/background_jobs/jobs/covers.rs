//! Removes cover images whose record is gone.
//!
//! Covers are stored as `<record id>.<ext>` anywhere below the covers
//! directory.

use crate::background_jobs::{StatusController, StatusKind};
use crate::library_store::{LibraryStore, RecordId};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub struct CoverJanitor {
    library_store: Arc<dyn LibraryStore>,
    statuses: Arc<StatusController>,
    covers_dir: PathBuf,
}

fn cover_record_id(path: &Path) -> Option<RecordId> {
    path.file_stem()?.to_str()?.parse().ok()
}

impl CoverJanitor {
    pub fn new(
        library_store: Arc<dyn LibraryStore>,
        statuses: Arc<StatusController>,
        covers_dir: PathBuf,
    ) -> Self {
        Self {
            library_store,
            statuses,
            covers_dir,
        }
    }

    pub fn remove_orphan_covers(&self) -> Result<usize> {
        let guard = self.statuses.begin(StatusKind::CoversRemoveOrphans, None);
        if !self.covers_dir.exists() {
            debug!("Covers dir {:?} does not exist", self.covers_dir);
            return Ok(0);
        }

        let valid_ids = self.library_store.valid_record_ids()?;
        let orphans: Vec<PathBuf> = WalkDir::new(&self.covers_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| match cover_record_id(path) {
                Some(id) => !valid_ids.contains(&id),
                None => {
                    debug!("Skipping non-cover file {:?}", path);
                    false
                }
            })
            .collect();

        let total = orphans.len() as u64;
        guard.update(0, Some(total));
        let mut removed = 0;
        for (done, path) in orphans.iter().enumerate() {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to remove orphan cover {:?}: {}", path, err),
            }
            guard.update(done as u64 + 1, Some(total));
        }

        if removed > 0 {
            info!("Removed {} orphan covers", removed);
        } else {
            debug!("No orphan covers to remove");
        }
        Ok(removed)
    }
}
