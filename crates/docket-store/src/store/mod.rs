//! Portal store implementation using SQLite.
//!
//! Holds the five portal domains in one database. Timestamps are stored as
//! INTEGER nanoseconds since the Unix epoch so that "changed after" queries
//! compare numerically, use the `(tenant_id, <timestamp>)` indexes, and lose
//! no precision against the feed's poll cursor.

mod change_ops;
mod write_ops;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version.
///
/// Version 1 stored timestamps as microseconds; version 2 stores nanoseconds.
const SCHEMA_VERSION: i32 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Portal Store
// ─────────────────────────────────────────────────────────────────────────────

/// Portal store backed by SQLite.
///
/// Uses WAL mode so detector reads from many streams do not block the
/// occasional write.
pub struct PortalStore {
    pub(crate) conn: Mutex<Connection>,
}

impl std::fmt::Debug for PortalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalStore").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl PortalStore {
    /// Open or create a portal store at the given path.
    ///
    /// Creates the database file and initializes the schema if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|_| {
                    StoreError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        info!("Portal store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        debug!("In-memory portal store created");
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::create_schema(&conn)
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating schema from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        conn.execute_batch(
            r#"
            -- Messages: append-only, change time is created_at
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                case_id TEXT,
                sender TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_tenant_created
                ON messages(tenant_id, created_at);

            -- Notifications: append-only, change time is created_at
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_tenant_created
                ON notifications(tenant_id, created_at);

            -- Cases
            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cases_tenant_updated
                ON cases(tenant_id, updated_at);

            -- Documents
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                case_id TEXT,
                name TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_tenant_updated
                ON documents(tenant_id, updated_at);

            -- Financial records: invoices, payments, adjustments
            CREATE TABLE IF NOT EXISTS financial_records (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_financial_records_tenant_updated
                ON financial_records(tenant_id, updated_at);
            "#,
        )?;

        if current_version == 1 {
            conn.execute_batch(
                r#"
                BEGIN;
                UPDATE messages SET created_at = created_at * 1000;
                UPDATE notifications SET created_at = created_at * 1000;
                UPDATE cases SET updated_at = updated_at * 1000;
                UPDATE documents SET updated_at = updated_at * 1000;
                UPDATE financial_records SET updated_at = updated_at * 1000;
                COMMIT;
                "#,
            )?;
        }

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamp encoding
// ─────────────────────────────────────────────────────────────────────────────

// Stored values cover 1677-09-21 to 2262-04-11.

pub(crate) fn to_nanos(ts: DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {ts}")))
}

pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Query bound for `since`; out-of-range cursors clamp to the ends of the
/// storable range.
pub(crate) fn cursor_nanos(since: DateTime<Utc>) -> i64 {
    match since.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None if since.timestamp() < 0 => i64::MIN,
        None => i64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_sets_version() {
        let store = PortalStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_open_on_disk_is_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("docket.db");

        drop(PortalStore::open(&path).unwrap());
        assert!(path.exists());
        PortalStore::open(&path).unwrap();
    }

    #[test]
    fn test_timestamps_keep_full_precision() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(from_nanos(to_nanos(ts).unwrap()), ts);
    }

    #[test]
    fn test_out_of_range_timestamps() {
        assert!(to_nanos(DateTime::<Utc>::MAX_UTC).is_err());
        assert_eq!(cursor_nanos(DateTime::<Utc>::MAX_UTC), i64::MAX);
        assert_eq!(cursor_nanos(DateTime::<Utc>::MIN_UTC), i64::MIN);
    }

    #[test]
    fn test_version_one_timestamps_are_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docket.db");
        let micros = 1_700_000_000_123_456_i64;

        {
            let store = PortalStore::open(&path).unwrap();
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO messages (id, tenant_id, sender, body, created_at)
                 VALUES ('m-1', 'acme', 'counsel', 'old', ?1)",
                [micros],
            )
            .unwrap();
            conn.pragma_update(None, "user_version", 1).unwrap();
        }

        let store = PortalStore::open(&path).unwrap();
        let conn = store.conn.lock();
        let stored: i64 = conn
            .query_row("SELECT created_at FROM messages WHERE id = 'm-1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(stored, micros * 1000);
    }
}
