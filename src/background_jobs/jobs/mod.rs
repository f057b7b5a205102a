//! The work behind each maintenance task.

mod app_update;
mod bookmarks;
mod covers;
mod janitor;

pub use app_update::{
    lifecycle_channel, ApplicationUpdater, LifecycleReceiver, LifecycleRequest, LifecycleSender,
    UpdateOutcome, UPDATE_FORCE_ENV, UP_TO_DATE_EXIT_CODE,
};
pub use bookmarks::BookmarkWriter;
pub use covers::CoverJanitor;
pub use janitor::{
    Janitor, BACKUP_FILE_NAME, DEFAULT_SEARCH_QUERY_TTL_DAYS, MAX_SEARCH_QUERY_TTL_DAYS,
};
