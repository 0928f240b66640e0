//! SQLite-backed artifact index
//!
//! Features:
//! - WAL mode for better concurrency
//! - Scoped predicate search with skip/limit pagination
//! - Distinct-coordinate counting across repositories
//! - Auto-recovery on corruption

use chrono::{DateTime, Utc};
use depot_core::{RepositoryKey, RepositoryPath};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;

const COLUMNS: &str = "storage_id, repository_id, path, coordinates, size, md5, sha1, \
                       cached, pinned, created, last_updated, last_used";

/// Persistence record of one stored or cached artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactEntry {
    pub storage_id: String,
    pub repository_id: String,
    /// Path relative to the repository base directory
    pub path: String,
    /// Canonical coordinates, the de-duplication key
    pub coordinates: String,
    pub size: u64,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    /// Bytes are present locally
    pub cached: bool,
    /// Exempt from eviction
    pub pinned: bool,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl ArtifactEntry {
    /// New cached entry for a committed path
    ///
    /// Returns `None` for paths without coordinates (metadata, checksums).
    pub fn for_path(path: &RepositoryPath, size: u64) -> Option<Self> {
        let coordinates = path.coordinates()?;
        let now = Utc::now();
        Some(Self {
            storage_id: path.storage_id().to_string(),
            repository_id: path.repository_id().to_string(),
            path: path.relative().to_string(),
            coordinates: coordinates.to_string(),
            size,
            md5: None,
            sha1: None,
            cached: true,
            pinned: false,
            created: now,
            last_updated: now,
            last_used: now,
        })
    }

    pub fn with_checksums(mut self, md5: impl Into<String>, sha1: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self.sha1 = Some(sha1.into());
        self
    }

    pub fn key(&self) -> RepositoryKey {
        RepositoryKey::new(&self.storage_id, &self.repository_id)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            storage_id: row.get(0)?,
            repository_id: row.get(1)?,
            path: row.get(2)?,
            coordinates: row.get(3)?,
            size: row.get::<_, i64>(4)?.max(0) as u64,
            md5: row.get(5)?,
            sha1: row.get(6)?,
            cached: row.get(7)?,
            pinned: row.get(8)?,
            created: from_millis(row.get(9)?),
            last_updated: from_millis(row.get(10)?),
            last_used: from_millis(row.get(11)?),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Filter applied to index queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactPredicate {
    /// Only paths starting with this prefix
    pub path_prefix: Option<String>,
    /// Only entries whose coordinates contain this text
    pub query: Option<String>,
    /// Only entries with exactly these coordinates
    pub coordinates: Option<String>,
}

impl ArtifactPredicate {
    /// Match every artifact
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_coordinates(mut self, coordinates: impl Into<String>) -> Self {
        self.coordinates = Some(coordinates.into());
        self
    }
}

/// Skip / limit window over an ordered result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Paginator {
    pub skip: u64,
    /// `None` means unbounded
    pub limit: Option<u64>,
}

impl Paginator {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Exclusive end of the window, if bounded
    pub fn end(&self) -> Option<u64> {
        self.limit.map(|limit| self.skip.saturating_add(limit))
    }

    /// Apply the window to an in-memory list
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let iter = items.into_iter().skip(skip);
        match self.limit {
            Some(limit) => iter.take(usize::try_from(limit).unwrap_or(usize::MAX)).collect(),
            None => iter.collect(),
        }
    }
}

/// SQLite index of artifact entries
pub struct ArtifactIndex {
    conn: Mutex<Connection>,
}

impl ArtifactIndex {
    /// Open or create the index at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::open_file(path) {
            Ok(index) => Ok(index),
            Err(e) => {
                // If corrupted, delete and recreate
                tracing::warn!("Artifact index corrupted, recreating: {}", e);
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Self::open_file(path)
            }
        }
    }

    fn open_file(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Open an in-memory index (for testing)
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Index location under a storage root
    pub fn default_path(root: &Path) -> PathBuf {
        root.join("artifacts.db")
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id INTEGER PRIMARY KEY,
                storage_id TEXT NOT NULL,
                repository_id TEXT NOT NULL,
                path TEXT NOT NULL,
                coordinates TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                md5 TEXT,
                sha1 TEXT,
                cached INTEGER NOT NULL DEFAULT 1,
                pinned INTEGER NOT NULL DEFAULT 0,
                created INTEGER NOT NULL,
                last_updated INTEGER NOT NULL,
                last_used INTEGER NOT NULL,
                UNIQUE(storage_id, repository_id, path)
            );

            CREATE INDEX IF NOT EXISTS idx_artifacts_repo ON artifacts(storage_id, repository_id);
            CREATE INDEX IF NOT EXISTS idx_artifacts_coordinates ON artifacts(coordinates);
            CREATE INDEX IF NOT EXISTS idx_artifacts_last_used ON artifacts(last_used);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an entry, keeping its original creation time
    pub fn upsert(&self, entry: &ArtifactEntry) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO artifacts (storage_id, repository_id, path, coordinates, size, md5, sha1,
                                   cached, pinned, created, last_updated, last_used)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(storage_id, repository_id, path) DO UPDATE SET
                coordinates = excluded.coordinates,
                size = excluded.size,
                md5 = excluded.md5,
                sha1 = excluded.sha1,
                cached = excluded.cached,
                last_updated = excluded.last_updated,
                last_used = excluded.last_used
            "#,
            params![
                entry.storage_id,
                entry.repository_id,
                entry.path,
                entry.coordinates,
                i64::try_from(entry.size).unwrap_or(i64::MAX),
                entry.md5,
                entry.sha1,
                entry.cached,
                entry.pinned,
                entry.created.timestamp_millis(),
                entry.last_updated.timestamp_millis(),
                entry.last_used.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Get an entry
    pub fn get(&self, key: &RepositoryKey, path: &str) -> Result<Option<ArtifactEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM artifacts \
             WHERE storage_id = ?1 AND repository_id = ?2 AND path = ?3"
        ))?;
        let entry = stmt
            .query_row(params![key.storage_id, key.repository_id, path], ArtifactEntry::from_row)
            .optional()?;
        Ok(entry)
    }

    /// Record a use of an entry (proxy cache hit)
    pub fn touch(&self, key: &RepositoryKey, path: &str) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE artifacts SET last_used = ?4 \
             WHERE storage_id = ?1 AND repository_id = ?2 AND path = ?3",
            params![key.storage_id, key.repository_id, path, Utc::now().timestamp_millis()],
        )?;
        Ok(updated > 0)
    }

    /// Remove an entry
    pub fn remove(&self, key: &RepositoryKey, path: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM artifacts WHERE storage_id = ?1 AND repository_id = ?2 AND path = ?3",
            params![key.storage_id, key.repository_id, path],
        )?;
        Ok(removed > 0)
    }

    /// Remove every entry of a repository
    pub fn remove_repository(&self, key: &RepositoryKey) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM artifacts WHERE storage_id = ?1 AND repository_id = ?2",
            params![key.storage_id, key.repository_id],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    /// Pin or unpin an entry
    pub fn set_pinned(&self, key: &RepositoryKey, path: &str, pinned: bool) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE artifacts SET pinned = ?4 \
             WHERE storage_id = ?1 AND repository_id = ?2 AND path = ?3",
            params![key.storage_id, key.repository_id, path, pinned],
        )?;
        Ok(updated > 0)
    }

    /// Cached entries of the given repositories matching a predicate, ordered
    /// by path and windowed by the paginator
    pub fn search(
        &self,
        scope: &[RepositoryKey],
        predicate: &ArtifactPredicate,
        paginator: &Paginator,
    ) -> Result<Vec<ArtifactEntry>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let (filter, mut values) = where_clause(scope, predicate);
        values.push(Value::Integer(
            paginator
                .limit
                .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
                .unwrap_or(-1),
        ));
        values.push(Value::Integer(i64::try_from(paginator.skip).unwrap_or(i64::MAX)));

        let sql = format!(
            "SELECT {COLUMNS} FROM artifacts WHERE {filter} \
             ORDER BY path, storage_id, repository_id LIMIT ? OFFSET ?"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values), ArtifactEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Number of distinct coordinates across the given repositories
    pub fn count(&self, scope: &[RepositoryKey], predicate: &ArtifactPredicate) -> Result<u64> {
        if scope.is_empty() {
            return Ok(0);
        }

        let (filter, values) = where_clause(scope, predicate);
        let sql = format!("SELECT COUNT(DISTINCT coordinates) FROM artifacts WHERE {filter}");

        let conn = self.conn();
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Cached, non-pinned entries of a repository last used before `cutoff`
    pub fn find_stale(
        &self,
        key: &RepositoryKey,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ArtifactEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM artifacts \
             WHERE storage_id = ?1 AND repository_id = ?2 \
               AND cached = 1 AND pinned = 0 AND last_used < ?3 \
             ORDER BY last_used"
        ))?;
        let entries = stmt
            .query_map(
                params![key.storage_id, key.repository_id, cutoff.timestamp_millis()],
                ArtifactEntry::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

/// Build `(scope OR ...) AND cached AND predicate` with positional values
fn where_clause(scope: &[RepositoryKey], predicate: &ArtifactPredicate) -> (String, Vec<Value>) {
    let mut values = Vec::with_capacity(scope.len() * 2 + 3);

    let repos = scope
        .iter()
        .map(|key| {
            values.push(Value::Text(key.storage_id.clone()));
            values.push(Value::Text(key.repository_id.clone()));
            "(storage_id = ? AND repository_id = ?)"
        })
        .collect::<Vec<_>>()
        .join(" OR ");

    let mut filter = format!("({repos}) AND cached = 1");

    if let Some(prefix) = &predicate.path_prefix {
        filter.push_str(" AND substr(path, 1, length(?)) = ?");
        values.push(Value::Text(prefix.clone()));
        values.push(Value::Text(prefix.clone()));
    }
    if let Some(query) = &predicate.query {
        filter.push_str(" AND instr(coordinates, ?) > 0");
        values.push(Value::Text(query.clone()));
    }
    if let Some(coordinates) = &predicate.coordinates {
        filter.push_str(" AND coordinates = ?");
        values.push(Value::Text(coordinates.clone()));
    }

    (filter, values)
}

impl std::fmt::Debug for ArtifactIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactIndex").finish_non_exhaustive()
    }
}
