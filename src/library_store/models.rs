use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RecordId = i64;

/// A record to insert into the library.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub path: String,
    pub title: String,
    pub series: Option<String>,
    pub tags: Vec<String>,
}

impl NewRecord {
    pub fn new(path: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            series: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchableRecord {
    pub id: RecordId,
    pub title: String,
    pub series: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Who owns a bookmark: a registered user or an anonymous session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFilter {
    User(i64),
    Session(String),
}

/// Bookmark fields to change. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkFields {
    pub page: Option<i64>,
    pub finished: Option<bool>,
    pub fit_to: Option<String>,
    pub two_pages: Option<bool>,
}

impl BookmarkFields {
    pub fn is_empty(&self) -> bool {
        self.page.is_none()
            && self.finished.is_none()
            && self.fit_to.is_none()
            && self.two_pages.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub record_id: RecordId,
    pub page: Option<i64>,
    pub finished: Option<bool>,
    pub fit_to: Option<String>,
    pub two_pages: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanCleanupReport {
    pub tag_links: usize,
    pub tags: usize,
    pub bookmarks: usize,
}

impl OrphanCleanupReport {
    pub fn total(&self) -> usize {
        self.tag_links + self.tags + self.bookmarks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl VacuumReport {
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}
