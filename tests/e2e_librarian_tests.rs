//! End-to-end tests for the librarian daemon
//!
//! Each test starts a real librarian from config and drives it through its
//! task queue.

mod common;

use chrono::Utc;
use common::{TestLibrarian, MISSING_RECORD_ID};
use pezzottify_librarian::background_jobs::jobs::LifecycleRequest;
use pezzottify_librarian::background_jobs::{
    BookmarkUpdate, CronMarker, QueueError, StatusKind, Task,
};
use pezzottify_librarian::library_store::{AuthFilter, BookmarkFields};

#[test]
fn test_startup_update_indexes_every_record() {
    let lib = TestLibrarian::builder().spawn();

    lib.wait_until("index populated", || {
        lib.indexed_record_ids() == lib.library_record_ids()
    });

    let index = &lib.librarian.context().search_index;
    let hits = index.search("Berserk", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record_id, lib.record_ids[0]);
    assert!(index.last_updated().unwrap().is_some());
}

#[test]
fn test_startup_update_is_followed_by_stale_removal() {
    let lib = TestLibrarian::builder()
        .stale_index_entries(&[MISSING_RECORD_ID])
        .spawn();

    lib.wait_until("stale entry removed", || {
        lib.indexed_record_ids() == lib.library_record_ids()
    });
    lib.wait_until("stale removal finished", || {
        lib.librarian
            .statuses()
            .get(StatusKind::SearchIndexRemoveStale)
            .is_some_and(|status| !status.active)
    });
}

#[test]
fn test_deleted_record_leaves_the_index_on_next_update() {
    let lib = TestLibrarian::builder().spawn();
    lib.wait_until("index populated", || {
        lib.indexed_record_ids() == lib.library_record_ids()
    });

    let deleted = lib.record_ids[1];
    assert!(lib.store.delete_record(deleted).unwrap());
    lib.librarian
        .queue()
        .put(Task::SearchIndexUpdate { force: false })
        .unwrap();

    lib.wait_until("deleted record unindexed", || {
        !lib.indexed_record_ids().contains(&deleted)
    });
    assert_eq!(lib.indexed_record_ids().len(), 2);
}

#[test]
fn test_wake_cron_runs_nightly_batch() {
    let lib = TestLibrarian::builder().idle().spawn();
    let orphan = lib.covers_dir.join(format!("{MISSING_RECORD_ID}.jpg"));
    std::fs::write(&orphan, b"cover").unwrap();

    lib.librarian.queue().put(Task::WakeCron).unwrap();

    let backup = lib.backup_dir.join("library.db.backup");
    lib.wait_until("backup written", || backup.exists());
    lib.wait_until("index populated", || {
        lib.indexed_record_ids() == lib.library_record_ids()
    });
    lib.wait_until("orphan cover removed", || !orphan.exists());
    assert!(lib.marker.last_run().unwrap().is_some());
}

#[test]
fn test_overdue_cron_fires_on_start() {
    let lib = TestLibrarian::builder().idle().cron_overdue().spawn();
    let recent = Utc::now() - chrono::Duration::hours(1);

    lib.wait_until("cron marker rewritten", || {
        lib.marker.last_run().unwrap().is_some_and(|at| at > recent)
    });
    let backup = lib.backup_dir.join("library.db.backup");
    lib.wait_until("backup written", || backup.exists());
}

#[test]
fn test_orphan_covers_are_removed_and_live_ones_kept() {
    let lib = TestLibrarian::builder().idle().spawn();
    let live = lib.covers_dir.join(format!("{}.jpg", lib.record_ids[0]));
    let orphan = lib.covers_dir.join(format!("{MISSING_RECORD_ID}.png"));
    let nested_dir = lib.covers_dir.join("nested");
    std::fs::create_dir_all(&nested_dir).unwrap();
    let nested_orphan = nested_dir.join(format!("{}.jpg", MISSING_RECORD_ID + 1));
    let unrelated = lib.covers_dir.join("README.txt");
    for path in [&live, &orphan, &nested_orphan, &unrelated] {
        std::fs::write(path, b"x").unwrap();
    }

    lib.librarian.queue().put(Task::RemoveOrphanCovers).unwrap();

    lib.wait_until("orphans removed", || {
        !orphan.exists() && !nested_orphan.exists()
    });
    assert!(live.exists());
    assert!(unrelated.exists());
}

#[test]
fn test_bookmark_update_through_queue() {
    let lib = TestLibrarian::builder().idle().spawn();
    let filter = AuthFilter::Session("session-1".to_string());
    let record_id = lib.record_ids[2];

    lib.librarian
        .queue()
        .put(Task::BookmarkUpdate(BookmarkUpdate {
            auth_filter: filter.clone(),
            record_ids: vec![record_id, MISSING_RECORD_ID],
            updates: BookmarkFields {
                page: Some(12),
                ..Default::default()
            },
        }))
        .unwrap();

    lib.wait_until("bookmark written", || {
        lib.store.get_bookmark(&filter, record_id).unwrap().is_some()
    });
    let bookmark = lib.store.get_bookmark(&filter, record_id).unwrap().unwrap();
    assert_eq!(bookmark.page, Some(12));
    assert!(lib
        .store
        .get_bookmark(&filter, MISSING_RECORD_ID)
        .unwrap()
        .is_none());
}

#[test]
fn test_user_active_update_through_queue() {
    let lib = TestLibrarian::builder().idle().spawn();
    let user_id = lib.store.create_user("reader").unwrap();

    lib.librarian
        .queue()
        .put(Task::UserActiveUpdate { user_id })
        .unwrap();

    lib.wait_until("user marked active", || {
        lib.store.user_last_active(user_id).unwrap().is_some()
    });
}

#[test]
fn test_failing_task_does_not_stop_dispatcher() {
    let lib = TestLibrarian::builder().idle().update_command("exit 1").spawn();
    let user_id = lib.store.create_user("reader").unwrap();

    let queue = lib.librarian.queue();
    queue.put(Task::UpdateApplication { force: false }).unwrap();
    queue.put(Task::UserActiveUpdate { user_id }).unwrap();

    lib.wait_until("task after failure processed", || {
        lib.store.user_last_active(user_id).unwrap().is_some()
    });
    assert_eq!(*lib.lifecycle.borrow(), LifecycleRequest::Run);
    let status = lib.librarian.statuses().get(StatusKind::JanitorUpdate).unwrap();
    assert!(!status.active);
}

#[test]
fn test_successful_update_requests_restart() {
    let lib = TestLibrarian::builder()
        .idle()
        .update_command("test \"$LIBRARIAN_UPDATE_FORCE\" = 1")
        .spawn();

    lib.librarian
        .queue()
        .put(Task::UpdateApplication { force: true })
        .unwrap();

    lib.wait_until("restart requested", || {
        *lib.lifecycle.borrow() == LifecycleRequest::Restart
    });
}

#[test]
fn test_shutdown_drops_pending_tasks() {
    let lib = TestLibrarian::builder().idle().spawn();
    let queue = lib.librarian.queue().clone();

    // The dispatcher stops at the first shutdown, leaving the rest queued.
    queue.put(Task::Shutdown).unwrap();
    queue.put(Task::CleanSearchQueries).unwrap();
    queue.put(Task::VacuumDatabase).unwrap();

    let dropped = lib.librarian.shutdown();

    // The two tasks plus the shutdown enqueued by `shutdown` itself.
    assert_eq!(dropped, 3);
    assert!(queue.is_empty());
    assert!(matches!(
        queue.put(Task::VacuumDatabase),
        Err(QueueError::Closed)
    ));
    assert!(!lib.librarian.cron().is_running());
    assert_eq!(lib.librarian.shutdown(), 0);
}

#[test]
fn test_shutdown_leaves_no_active_status() {
    let lib = TestLibrarian::builder().spawn();
    lib.wait_until("index populated", || {
        lib.indexed_record_ids() == lib.library_record_ids()
    });

    lib.librarian.shutdown();

    assert!(lib.librarian.statuses().active().is_empty());
}
