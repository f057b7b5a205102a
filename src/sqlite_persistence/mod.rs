//! Shared SQLite plumbing: versioned schemas and database opening.

mod versioned_schema;

pub use versioned_schema::*;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a database at `path`, creating it with the latest schema when it is
/// empty, or validating and migrating it otherwise.
///
/// The version check and the schema creation run in one `BEGIN IMMEDIATE`
/// transaction, so several processes can open the same fresh file at once:
/// the first one creates the schema and the others validate it.
///
/// `label` is only used for log and error messages.
pub fn open_versioned_db(
    path: &Path,
    schemas: &[VersionedSchema],
    label: &str,
) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory for {} database", label))?;
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("Failed to open {} database", label))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    let latest = schemas
        .last()
        .with_context(|| format!("No schema defined for {} database", label))?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .with_context(|| format!("Failed to lock {} database", label))?;

    let raw_version: i64 = tx.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if raw_version == 0 {
        let has_tables: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table')",
            [],
            |row| row.get(0),
        )?;
        if !has_tables {
            info!("Creating new {} database at {:?}", label, path);
            latest.create(&tx)?;
            tx.commit()?;
            return Ok(conn);
        }
    }

    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        anyhow::bail!(
            "{} database version {} is invalid (expected >= 1)",
            label,
            db_version
        );
    }

    let version_index = schemas
        .iter()
        .position(|s| s.version == db_version as usize)
        .with_context(|| format!("Unknown {} database version {}", label, db_version))?;
    schemas[version_index].validate(&tx).with_context(|| {
        format!(
            "{} database schema validation failed for version {}",
            label, db_version
        )
    })?;

    if (db_version as usize) < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            label, db_version, latest.version
        );
        migrate(&tx, schemas, db_version as usize)?;
    }
    tx.commit()?;

    Ok(conn)
}

fn migrate(tx: &Transaction, schemas: &[VersionedSchema], from_version: usize) -> Result<()> {
    let mut latest_from = from_version;
    for schema in schemas.iter().filter(|s| s.version > from_version) {
        if let Some(migration_fn) = schema.migration {
            migration_fn(tx).with_context(|| {
                format!("Failed to run migration to version {}", schema.version)
            })?;
        }
        latest_from = schema.version;
    }
    tx.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
        [],
    )?;
    Ok(())
}
