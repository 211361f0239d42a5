//! C3: Deletion Tracker.
//!
//! Append-only ledger of deletions and collection-level operations the
//! vector store cannot reconstruct on its own. Lives in the same local
//! SQLite file as C2, in its own table.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;
use crate::model::{DeletionOperationType, DeletionRecord};

/// `rusqlite::Connection` is `Send` but not `Sync`; the mutex is what lets a
/// `DeletionTracker` sit behind the `Arc` that `RepositoryContext` shares
/// across the concurrently-detected collections of §5.
pub struct DeletionTracker {
    conn: Mutex<Connection>,
}

impl DeletionTracker {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn record_document_deletion(
        &self,
        repo: &str,
        collection: &str,
        doc_id: &str,
        original_hash: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO deletion_records
                (repository_path, collection_name, doc_id, operation_type, original_content_hash, is_committed)
             VALUES (?1, ?2, ?3, 'document_delete', ?4, 0)",
            (repo, collection, doc_id, original_hash),
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn record_collection_operation(
        &self,
        repo: &str,
        collection: &str,
        op: DeletionOperationType,
        original_name: Option<&str>,
        new_name_or_metadata: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO deletion_records
                (repository_path, collection_name, doc_id, operation_type, original_name, new_name_or_metadata, is_committed)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5, 0)",
            (repo, collection, op_to_str(op), original_name, new_name_or_metadata),
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_pending_document_deletions(&self, repo: &str, collection: &str) -> Result<Vec<DeletionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, repository_path, collection_name, doc_id, operation_type, original_content_hash,
                    original_name, new_name_or_metadata, is_committed
             FROM deletion_records
             WHERE repository_path = ?1 AND collection_name = ?2
               AND operation_type = 'document_delete' AND is_committed = 0",
        )?;
        let rows = stmt.query_map((repo, collection), row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_pending_collection_operations(&self, repo: &str) -> Result<Vec<DeletionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, repository_path, collection_name, doc_id, operation_type, original_content_hash,
                    original_name, new_name_or_metadata, is_committed
             FROM deletion_records
             WHERE repository_path = ?1 AND operation_type != 'document_delete' AND is_committed = 0",
        )?;
        let rows = stmt.query_map([repo], row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn mark_committed(&self, repo: &str, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE deletion_records SET is_committed = 1 WHERE id = ?1 AND repository_path = ?2",
            (id, repo),
        )?;
        Ok(())
    }

    /// Deletes records durably reflected in a versioned commit. Append-only
    /// otherwise: rows are never removed except through this cleanup.
    pub fn cleanup_committed(&self, repo: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM deletion_records WHERE repository_path = ?1 AND is_committed = 1", [repo])?;
        Ok(n as u64)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS deletion_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_path TEXT NOT NULL,
    collection_name TEXT NOT NULL,
    doc_id TEXT,
    operation_type TEXT NOT NULL,
    original_content_hash TEXT,
    original_name TEXT,
    new_name_or_metadata TEXT,
    is_committed INTEGER NOT NULL DEFAULT 0
);
"#;

fn op_to_str(op: DeletionOperationType) -> &'static str {
    match op {
        DeletionOperationType::DocumentDelete => "document_delete",
        DeletionOperationType::Deletion => "deletion",
        DeletionOperationType::Rename => "rename",
        DeletionOperationType::MetadataUpdate => "metadata_update",
    }
}

fn op_from_str(s: &str) -> DeletionOperationType {
    match s {
        "deletion" => DeletionOperationType::Deletion,
        "rename" => DeletionOperationType::Rename,
        "metadata_update" => DeletionOperationType::MetadataUpdate,
        _ => DeletionOperationType::DocumentDelete,
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DeletionRecord> {
    let op: String = row.get(4)?;
    let committed: i64 = row.get(8)?;
    Ok(DeletionRecord {
        id: row.get(0)?,
        repository_path: row.get(1)?,
        collection_name: row.get(2)?,
        doc_id: row.get(3)?,
        operation_type: op_from_str(&op),
        original_content_hash: row.get(5)?,
        original_name: row.get(6)?,
        new_name_or_metadata: row.get(7)?,
        is_committed: committed != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_document_deletions_round_trip() {
        let tracker = DeletionTracker::open_in_memory().unwrap();
        tracker.record_document_deletion("/repo", "col1", "d1", Some("hash1")).unwrap();

        let pending = tracker.get_pending_document_deletions("/repo", "col1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].doc_id.as_deref(), Some("d1"));
        assert!(!pending[0].is_committed);
    }

    #[test]
    fn mark_committed_then_cleanup_removes_row() {
        let tracker = DeletionTracker::open_in_memory().unwrap();
        let id = tracker.record_document_deletion("/repo", "col1", "d1", None).unwrap();
        tracker.mark_committed("/repo", id).unwrap();

        assert!(tracker.get_pending_document_deletions("/repo", "col1").unwrap().is_empty());

        let removed = tracker.cleanup_committed("/repo").unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn collection_operations_are_separate_from_document_deletions() {
        let tracker = DeletionTracker::open_in_memory().unwrap();
        tracker.record_document_deletion("/repo", "col1", "d1", None).unwrap();
        tracker
            .record_collection_operation("/repo", "col1", DeletionOperationType::Rename, Some("col1"), Some("col2"))
            .unwrap();

        assert_eq!(tracker.get_pending_document_deletions("/repo", "col1").unwrap().len(), 1);
        assert_eq!(tracker.get_pending_collection_operations("/repo").unwrap().len(), 1);
    }

    #[test]
    fn cleanup_never_touches_uncommitted_rows() {
        let tracker = DeletionTracker::open_in_memory().unwrap();
        tracker.record_document_deletion("/repo", "col1", "d1", None).unwrap();
        let removed = tracker.cleanup_committed("/repo").unwrap();
        assert_eq!(removed, 0);
        assert_eq!(tracker.get_pending_document_deletions("/repo", "col1").unwrap().len(), 1);
    }
}
