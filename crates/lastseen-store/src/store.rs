//! SQLite persistence for the watch-set and the presence archive.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use lastseen_core::{ArchiveRecord, PresenceSnapshot, Storage, WatchedSubject};

use crate::error::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed store. The connection sits behind a mutex so the store can
/// be shared between the poll loop and the request handlers.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) a database at the given filesystem path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!(path = %path.display(), "opened store");
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS watched (
                id      INTEGER PRIMARY KEY,
                user    TEXT NOT NULL,
                source  TEXT NOT NULL,
                UNIQUE (user, source)
            );
            CREATE TABLE IF NOT EXISTS archive (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                source    TEXT NOT NULL,
                user      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS archive_user ON archive (user);
            CREATE INDEX IF NOT EXISTS archive_source ON archive (source);",
        )?;
        Ok(())
    }

    // ─── Watch-set ───────────────────────────────────────────────

    /// Add a subject to the watch-set. Watching an already-watched subject is a no-op.
    pub fn watch(&self, user: &str, source: &str) -> Result<WatchedSubject> {
        let subject = WatchedSubject::new(user.trim(), source.trim());
        if !subject.is_valid() {
            return Err(StoreError::InvalidSubject);
        }
        self.conn()?.execute(
            "INSERT OR IGNORE INTO watched (user, source) VALUES (?1, ?2)",
            params![subject.user, subject.source],
        )?;
        Ok(subject)
    }

    /// Remove a user from the watch-set, for one source or all of them.
    /// Returns the number of subjects removed.
    pub fn unwatch(&self, user: &str, source: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        let removed = match source {
            Some(source) => conn.execute(
                "DELETE FROM watched WHERE user = ?1 AND source = ?2",
                params![user.trim(), source.trim()],
            )?,
            None => conn.execute("DELETE FROM watched WHERE user = ?1", params![user.trim()])?,
        };
        Ok(removed)
    }

    /// The watch-set in insertion order.
    pub fn list_watched(&self) -> Result<Vec<WatchedSubject>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user, source FROM watched ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(WatchedSubject::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn watched_subject(&self, user: &str, source: &str) -> Result<Option<WatchedSubject>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT user, source FROM watched WHERE user = ?1 AND source = ?2")?;
        let mut rows = stmt.query(params![user.trim(), source.trim()])?;
        match rows.next()? {
            Some(row) => Ok(Some(WatchedSubject::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))),
            None => Ok(None),
        }
    }

    // ─── Archive ─────────────────────────────────────────────────

    /// Append one snapshot. Existing rows are never touched.
    pub fn append_archive(&self, snapshot: &PresenceSnapshot) -> Result<ArchiveRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO archive (timestamp, source, user) VALUES (?1, ?2, ?3)",
            params![
                format_timestamp(&snapshot.observed_at),
                snapshot.source,
                snapshot.user,
            ],
        )?;
        Ok(ArchiveRecord {
            id: conn.last_insert_rowid(),
            timestamp: snapshot.observed_at,
            source: snapshot.source.clone(),
            user: snapshot.user.clone(),
        })
    }

    pub fn archive_by_user(&self, user: &str) -> Result<Vec<ArchiveRecord>> {
        self.query_archive(
            "SELECT id, timestamp, source, user FROM archive WHERE user = ?1 ORDER BY id",
            &[user.trim()],
        )
    }

    pub fn archive_by_source(&self, source: &str) -> Result<Vec<ArchiveRecord>> {
        self.query_archive(
            "SELECT id, timestamp, source, user FROM archive WHERE source = ?1 ORDER BY id",
            &[source.trim()],
        )
    }

    pub fn archive_by_user_and_source(&self, user: &str, source: &str) -> Result<Vec<ArchiveRecord>> {
        self.query_archive(
            "SELECT id, timestamp, source, user FROM archive
             WHERE user = ?1 AND source = ?2 ORDER BY id",
            &[user.trim(), source.trim()],
        )
    }

    fn query_archive(&self, sql: &str, args: &[&str]) -> Result<Vec<ArchiveRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, timestamp, source, user) = row?;
            let timestamp = parse_timestamp(&timestamp)
                .ok_or(StoreError::CorruptTimestamp { id, value: timestamp })?;
            result.push(ArchiveRecord {
                id,
                timestamp,
                source,
                user,
            });
        }
        Ok(result)
    }
}

impl Storage for Store {
    type Error = StoreError;

    fn list_watched(&self) -> Result<Vec<WatchedSubject>> {
        Store::list_watched(self)
    }

    fn append_archive(&self, snapshot: &PresenceSnapshot) -> Result<ArchiveRecord> {
        Store::append_archive(self, snapshot)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
