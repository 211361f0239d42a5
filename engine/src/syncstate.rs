//! C2: Sync-State Store.
//!
//! A local embedded SQLite database, decoupled from the versioned data, so
//! that recording "what commit has this branch/collection been synced to"
//! never touches the versioning engine's own merge/diff surface. Mirrors
//! the `LocalDb` shape this codebase already uses for local client state.

use std::path::Path;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use rusqlite::Connection;

use crate::error::Result;
use crate::model::{SyncStateRecord, SyncStatus};

/// `rusqlite::Connection` is `Send` but not `Sync`; the mutex lets a store
/// sit behind the `Arc` that `RepositoryContext` shares across the
/// concurrently-detected collections of §5.
pub struct SyncStateStore {
    conn: Mutex<Connection>,
}

impl SyncStateStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chroma_sync_state (
                repo_path TEXT NOT NULL,
                branch TEXT NOT NULL,
                collection_name TEXT NOT NULL,
                last_sync_commit TEXT,
                last_sync_at INTEGER,
                document_count INTEGER NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                sync_status TEXT NOT NULL DEFAULT 'in_progress',
                error_message TEXT,
                PRIMARY KEY (repo_path, branch, collection_name)
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE TABLE chroma_sync_state (
                repo_path TEXT NOT NULL,
                branch TEXT NOT NULL,
                collection_name TEXT NOT NULL,
                last_sync_commit TEXT,
                last_sync_at INTEGER,
                document_count INTEGER NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                sync_status TEXT NOT NULL DEFAULT 'in_progress',
                error_message TEXT,
                PRIMARY KEY (repo_path, branch, collection_name)
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn get(&self, repo_path: &str, branch: &str, collection_name: &str) -> Result<Option<SyncStateRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT repo_path, branch, collection_name, last_sync_commit, last_sync_at,
                    document_count, chunk_count, sync_status, error_message
             FROM chroma_sync_state WHERE repo_path = ?1 AND branch = ?2 AND collection_name = ?3",
        )?;
        let result = stmt.query_row((repo_path, branch, collection_name), row_to_record);
        match result {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert(&self, record: &SyncStateRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chroma_sync_state
                (repo_path, branch, collection_name, last_sync_commit, last_sync_at,
                 document_count, chunk_count, sync_status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(repo_path, branch, collection_name) DO UPDATE SET
                last_sync_commit = excluded.last_sync_commit,
                last_sync_at = excluded.last_sync_at,
                document_count = excluded.document_count,
                chunk_count = excluded.chunk_count,
                sync_status = excluded.sync_status,
                error_message = excluded.error_message",
            (
                &record.repo_path,
                &record.branch,
                &record.collection_name,
                &record.last_sync_commit,
                record.last_sync_at.map(|t| t.timestamp()),
                record.document_count as i64,
                record.chunk_count as i64,
                status_to_str(record.sync_status),
                &record.error_message,
            ),
        )?;
        Ok(())
    }

    pub fn update_commit_hash(&self, repo_path: &str, branch: &str, collection_name: &str, commit_hash: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chroma_sync_state SET last_sync_commit = ?4, last_sync_at = ?5, sync_status = 'synced'
             WHERE repo_path = ?1 AND branch = ?2 AND collection_name = ?3",
            (repo_path, branch, collection_name, commit_hash, Utc::now().timestamp()),
        )?;
        Ok(())
    }

    pub fn delete(&self, repo_path: &str, branch: &str, collection_name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM chroma_sync_state WHERE repo_path = ?1 AND branch = ?2 AND collection_name = ?3",
            (repo_path, branch, collection_name),
        )?;
        Ok(())
    }

    pub fn list_by_repo(&self, repo_path: &str) -> Result<Vec<SyncStateRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT repo_path, branch, collection_name, last_sync_commit, last_sync_at,
                    document_count, chunk_count, sync_status, error_message
             FROM chroma_sync_state WHERE repo_path = ?1",
        )?;
        let rows = stmt.query_map([repo_path], row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_by_branch(&self, repo_path: &str, branch: &str) -> Result<Vec<SyncStateRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT repo_path, branch, collection_name, last_sync_commit, last_sync_at,
                    document_count, chunk_count, sync_status, error_message
             FROM chroma_sync_state WHERE repo_path = ?1 AND branch = ?2",
        )?;
        let rows = stmt.query_map((repo_path, branch), row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Deletes every record for `(repo_path, branch)`. Never touches other
    /// branches' records (invariant 5 / §9 "branch-aware sync state").
    pub fn clear_branch(&self, repo_path: &str, branch: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM chroma_sync_state WHERE repo_path = ?1 AND branch = ?2",
            (repo_path, branch),
        )?;
        Ok(())
    }

    /// Derives a starting record from the versioning engine's current HEAD
    /// when no prior record exists for this branch — used the first time a
    /// branch is synced.
    pub fn reconstruct_for_branch(
        &self,
        repo_path: &str,
        branch: &str,
        collection_name: &str,
        head_commit: Option<&str>,
    ) -> Result<SyncStateRecord> {
        if let Some(existing) = self.get(repo_path, branch, collection_name)? {
            return Ok(existing);
        }
        let mut record = SyncStateRecord::new(repo_path, branch, collection_name);
        record.last_sync_commit = head_commit.map(String::from);
        record.sync_status = SyncStatus::InProgress;
        self.upsert(&record)?;
        Ok(record)
    }
}

fn status_to_str(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Synced => "synced",
        SyncStatus::InProgress => "in_progress",
        SyncStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> SyncStatus {
    match s {
        "synced" => SyncStatus::Synced,
        "failed" => SyncStatus::Failed,
        _ => SyncStatus::InProgress,
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SyncStateRecord> {
    let last_sync_at: Option<i64> = row.get(4)?;
    let status: String = row.get(7)?;
    Ok(SyncStateRecord {
        repo_path: row.get(0)?,
        branch: row.get(1)?,
        collection_name: row.get(2)?,
        last_sync_commit: row.get(3)?,
        last_sync_at: last_sync_at.and_then(|t| Utc.timestamp_opt(t, 0).single()),
        document_count: row.get::<_, i64>(5)? as u64,
        chunk_count: row.get::<_, i64>(6)? as u64,
        sync_status: status_from_str(&status),
        error_message: row.get(8)?,
    })
}
