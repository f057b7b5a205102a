use crate::background_jobs::BookmarkUpdate;
use crate::library_store::LibraryStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies bookmark and user activity writes queued by the web layer.
pub struct BookmarkWriter {
    library_store: Arc<dyn LibraryStore>,
}

impl BookmarkWriter {
    pub fn new(library_store: Arc<dyn LibraryStore>) -> Self {
        Self { library_store }
    }

    pub fn update_bookmarks(&self, update: &BookmarkUpdate) -> Result<usize> {
        if update.updates.is_empty() || update.record_ids.is_empty() {
            debug!("Empty bookmark update, nothing to do");
            return Ok(0);
        }
        let mut record_ids = Vec::with_capacity(update.record_ids.len());
        for &record_id in &update.record_ids {
            if self.library_store.record_exists(record_id)? {
                record_ids.push(record_id);
            } else {
                warn!("Skipping bookmark for unknown record {}", record_id);
            }
        }
        if record_ids.is_empty() {
            return Ok(0);
        }
        let changed = self.library_store.update_bookmarks(
            &update.auth_filter,
            &record_ids,
            &update.updates,
        )?;
        debug!(
            "Updated {} bookmarks for {:?}",
            changed, update.auth_filter
        );
        Ok(changed)
    }

    pub fn update_user_active(&self, user_id: i64) -> Result<bool> {
        let found = self.library_store.touch_user_active(user_id, Utc::now())?;
        if !found {
            warn!("Cannot mark unknown user {} as active", user_id);
        }
        Ok(found)
    }
}
