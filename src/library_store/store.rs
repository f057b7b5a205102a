use super::models::*;
use super::schema::LIBRARY_VERSIONED_SCHEMAS;
use super::LibraryStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// SQLite-backed library store.
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteLibraryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = open_versioned_db(&db_path, LIBRARY_VERSIONED_SCHEMAS, "library")?;

        let record_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))
            .unwrap_or(0);
        info!("Opened library database with {} records", record_count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn from_timestamp(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    fn database_size(conn: &Connection) -> Result<u64> {
        let page_count: i64 = conn.query_row("PRAGMA page_count;", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size;", [], |r| r.get(0))?;
        Ok((page_count * page_size).max(0) as u64)
    }

    // =========================================================================
    // Writes used by importers and tests
    // =========================================================================

    pub fn insert_record(&self, record: &NewRecord) -> Result<RecordId> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO records (path, title, series, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.path,
                record.title,
                record.series,
                Utc::now().timestamp()
            ],
        )
        .with_context(|| format!("Failed to insert record {}", record.path))?;
        let id = tx.last_insert_rowid();

        for tag in &record.tags {
            tx.execute(
                "INSERT INTO tags (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                params![tag],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO record_tags (record_id, tag_id)
                 SELECT ?1, id FROM tags WHERE name = ?2",
                params![id, tag],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    /// Change a record's title, bumping `updated_at`.
    pub fn rename_record(&self, id: RecordId, title: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE records SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, Utc::now().timestamp(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_record(&self, id: RecordId) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM records WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn create_user(&self, username: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (username) VALUES (?1)",
            params![username],
        )
        .with_context(|| format!("Failed to create user {}", username))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn user_last_active(&self, user_id: i64) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let secs: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_active FROM users WHERE id = ?1",
                params![user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(secs.flatten().map(Self::from_timestamp))
    }

    pub fn record_search_query(&self, text: &str, used_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO search_queries (text, used_at) VALUES (?1, ?2)
             ON CONFLICT(text) DO UPDATE SET used_at = ?2",
            params![text, used_at.timestamp()],
        )?;
        Ok(())
    }

    pub fn search_query_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM search_queries", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn tag_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn get_bookmark(&self, filter: &AuthFilter, record_id: RecordId) -> Result<Option<Bookmark>> {
        let (user_id, session_key) = Self::owner_columns(filter);
        let conn = self.conn();
        let bookmark = conn
            .query_row(
                "SELECT record_id, page, finished, fit_to, two_pages FROM bookmarks
                 WHERE record_id = ?1 AND user_id IS ?2 AND session_key IS ?3",
                params![record_id, user_id, session_key],
                |row| {
                    Ok(Bookmark {
                        record_id: row.get(0)?,
                        page: row.get(1)?,
                        finished: row.get::<_, Option<i64>>(2)?.map(|v| v != 0),
                        fit_to: row.get(3)?,
                        two_pages: row.get::<_, Option<i64>>(4)?.map(|v| v != 0),
                    })
                },
            )
            .optional()?;
        Ok(bookmark)
    }

    fn owner_columns(filter: &AuthFilter) -> (Option<i64>, Option<&str>) {
        match filter {
            AuthFilter::User(user_id) => (Some(*user_id), None),
            AuthFilter::Session(key) => (None, Some(key.as_str())),
        }
    }
}

impl LibraryStore for SqliteLibraryStore {
    fn valid_record_ids(&self) -> Result<HashSet<RecordId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM records")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, RecordId>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn record_exists(&self, id: RecordId) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE id = ?1)",
            params![id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn searchable_records(&self) -> Result<Vec<SearchableRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, title, series, updated_at FROM records ORDER BY id")?;
        let records = stmt
            .query_map([], |row| {
                Ok(SearchableRecord {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    series: row.get(2)?,
                    updated_at: Self::from_timestamp(row.get(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn clean_orphans(&self) -> Result<OrphanCleanupReport> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let tag_links = tx.execute(
            "DELETE FROM record_tags
             WHERE record_id NOT IN (SELECT id FROM records)
                OR tag_id NOT IN (SELECT id FROM tags)",
            [],
        )?;
        let tags = tx.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT tag_id FROM record_tags)",
            [],
        )?;
        let bookmarks = tx.execute(
            "DELETE FROM bookmarks
             WHERE record_id NOT IN (SELECT id FROM records)
                OR (user_id IS NOT NULL AND user_id NOT IN (SELECT id FROM users))",
            [],
        )?;
        tx.commit()?;
        Ok(OrphanCleanupReport {
            tag_links,
            tags,
            bookmarks,
        })
    }

    fn clean_search_queries(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let deleted = conn.execute(
            "DELETE FROM search_queries WHERE used_at < ?1",
            params![older_than.timestamp()],
        )?;
        Ok(deleted)
    }

    fn vacuum(&self) -> Result<VacuumReport> {
        let conn = self.conn();
        let bytes_before = Self::database_size(&conn)?;
        conn.execute_batch("VACUUM;").context("VACUUM failed")?;
        let bytes_after = Self::database_size(&conn)?;
        Ok(VacuumReport {
            bytes_before,
            bytes_after,
        })
    }

    fn backup_to(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            bail!("Backup destination already exists: {:?}", dest);
        }
        let dest_str = dest
            .to_str()
            .with_context(|| format!("Backup path is not valid UTF-8: {:?}", dest))?;
        let conn = self.conn();
        conn.execute("VACUUM INTO ?1", params![dest_str])
            .with_context(|| format!("Failed to back up library database to {:?}", dest))?;
        debug!("Library database copied to {:?}", dest);
        Ok(())
    }

    fn update_bookmarks(
        &self,
        filter: &AuthFilter,
        record_ids: &[RecordId],
        fields: &BookmarkFields,
    ) -> Result<usize> {
        let (user_id, session_key) = Self::owner_columns(filter);
        let now = Utc::now().timestamp();
        let finished = fields.finished.map(i64::from);
        let two_pages = fields.two_pages.map(i64::from);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut written = 0;
        for record_id in record_ids {
            let updated = tx.execute(
                "UPDATE bookmarks SET
                    page = COALESCE(?1, page),
                    finished = COALESCE(?2, finished),
                    fit_to = COALESCE(?3, fit_to),
                    two_pages = COALESCE(?4, two_pages),
                    updated_at = ?5
                 WHERE record_id = ?6 AND user_id IS ?7 AND session_key IS ?8",
                params![
                    fields.page,
                    finished,
                    fields.fit_to,
                    two_pages,
                    now,
                    record_id,
                    user_id,
                    session_key
                ],
            )?;
            if updated > 0 {
                written += updated;
                continue;
            }
            written += tx.execute(
                "INSERT INTO bookmarks
                    (record_id, user_id, session_key, page, finished, fit_to, two_pages, updated_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 WHERE EXISTS(SELECT 1 FROM records WHERE id = ?1)",
                params![
                    record_id,
                    user_id,
                    session_key,
                    fields.page,
                    finished,
                    fields.fit_to,
                    two_pages,
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(written)
    }

    fn touch_user_active(&self, user_id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE users SET last_active = ?1 WHERE id = ?2",
            params![at.timestamp(), user_id],
        )?;
        Ok(updated > 0)
    }
}
