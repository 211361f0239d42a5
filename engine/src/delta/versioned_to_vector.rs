//! C4: Delta Detector (Versioned→Vector).
//!
//! Reads the versioning engine's `documents`/`document_sync_log` tables to
//! determine what the vector store hasn't seen yet, and wraps the native
//! `DIFF(from, to, table)` relation for commit-to-commit replay.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::error::Result;
use crate::model::{DeletedDoc, Document, Metadata, SyncAction, SyncDirection, SyncStateRecord, SyncStatus, VersionedChanges};
use crate::row::{Row, RowValue, Statement};
use crate::versioning::{DiffKind, VersioningEngineClient};

/// Output of `pending_sync_documents`: kept distinct from `VersionedChanges`
/// (which also carries `removed`) because this query never looks at
/// deletions — that's `deleted_documents`'s job.
#[derive(Debug, Clone, Default)]
pub struct PendingSyncDocuments {
    pub new: Vec<Document>,
    pub modified: Vec<Document>,
}

impl PendingSyncDocuments {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty()
    }
}

pub struct VersionedToVectorDetector {
    versioning: Arc<dyn VersioningEngineClient>,
}

/// Swallows `TableNotFound` into an empty result — a fresh repository with
/// no `documents` table yet is not an error at this layer (§4.5
/// robustness note, §7).
async fn empty_on_missing_table<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(crate::error::SyncError::TableNotFound) => Ok(T::default()),
        other => other,
    }
}

impl VersionedToVectorDetector {
    pub fn new(versioning: Arc<dyn VersioningEngineClient>) -> Self {
        Self { versioning }
    }

    pub async fn all_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let rows = empty_on_missing_table(
            self.versioning
                .query(
                    "SELECT doc_id, collection_name, content, content_hash, title, doc_type, metadata
                     FROM documents WHERE collection_name = ?1",
                    &[RowValue::Text(collection.to_string())],
                )
                .await,
        )
        .await?;
        Ok(rows.iter().filter_map(row_to_document).collect())
    }

    pub async fn available_collections(&self) -> Result<Vec<String>> {
        let from_docs = empty_on_missing_table(
            self.versioning.query("SELECT DISTINCT collection_name FROM documents", &[]).await,
        )
        .await?;
        let from_collections = empty_on_missing_table(
            self.versioning.query("SELECT DISTINCT collection_name FROM collections", &[]).await,
        )
        .await?;

        let mut names: Vec<String> = from_docs
            .iter()
            .chain(from_collections.iter())
            .filter_map(|r| r.get_string("collection_name"))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Documents whose current `content_hash` differs from, or is absent
    /// in, the vector-to-versioned-direction-complement sync log entry —
    /// i.e. what C7's versioned→vector replay still needs to push.
    pub async fn pending_sync_documents(&self, collection: &str) -> Result<PendingSyncDocuments> {
        let docs = self.all_documents(collection).await?;
        let log = self.sync_log_hashes(collection, SyncDirection::VersionedToVector).await?;

        let mut out = PendingSyncDocuments::default();
        for doc in docs {
            match log.get(&doc.doc_id) {
                None => out.new.push(doc),
                Some(hash) if hash != &doc.content_hash => out.modified.push(doc),
                Some(_) => {}
            }
        }
        Ok(out)
    }

    /// Documents the sync log remembers pushing but which are no longer
    /// present in the `documents` table.
    pub async fn deleted_documents(&self, collection: &str) -> Result<Vec<DeletedDoc>> {
        let docs = self.all_documents(collection).await?;
        let present: std::collections::HashSet<String> = docs.iter().map(|d| d.doc_id.clone()).collect();

        let log_rows = empty_on_missing_table(
            self.versioning
                .query(
                    "SELECT doc_id, content_hash FROM document_sync_log
                     WHERE collection_name = ?1 AND sync_direction = ?2",
                    &[RowValue::Text(collection.to_string()), RowValue::Text(direction_to_str(SyncDirection::VersionedToVector).to_string())],
                )
                .await,
        )
        .await?;

        Ok(log_rows
            .iter()
            .filter_map(|r| {
                let doc_id = r.get_string("doc_id")?;
                if present.contains(&doc_id) {
                    return None;
                }
                Some(DeletedDoc {
                    doc_id,
                    collection_name: collection.to_string(),
                    original_content_hash: r.get_string("content_hash"),
                })
            })
            .collect())
    }

    /// Wraps the native `DIFF(from, to, table)` relation, optionally
    /// restricted to one collection.
    pub async fn commit_diff(&self, from_commit: &str, to_commit: &str, collection: Option<&str>) -> Result<VersionedChanges> {
        let diff_rows = self.versioning.diff(from_commit, to_commit, "documents").await?;
        let mut changes = VersionedChanges::default();

        for d in diff_rows {
            if let Some(col) = collection {
                if d.row.get_string("collection_name").as_deref() != Some(col) {
                    continue;
                }
            }
            match d.kind {
                DiffKind::Added => {
                    if let Some(doc) = row_to_document(&d.row) {
                        changes.added.push(doc);
                    }
                }
                DiffKind::Modified => {
                    if let Some(doc) = row_to_document(&d.row) {
                        changes.modified.push(doc);
                    }
                }
                DiffKind::Removed => {
                    changes.removed.push(DeletedDoc {
                        doc_id: d.row.get_string("doc_id").unwrap_or_default(),
                        collection_name: d.row.get_string("collection_name").unwrap_or_default(),
                        original_content_hash: d.row.get_string("content_hash"),
                    });
                }
            }
        }
        Ok(changes)
    }

    pub async fn record_sync(
        &self,
        doc_id: &str,
        collection: &str,
        content_hash: &str,
        chunk_ids: &[String],
        direction: SyncDirection,
        action: SyncAction,
    ) -> Result<()> {
        let chunk_ids_json = serde_json::to_string(chunk_ids).unwrap_or_else(|_| "[]".to_string());
        self.versioning
            .execute(&Statement::new(
                "INSERT INTO document_sync_log
                    (doc_id, collection_name, content_hash, chroma_chunk_ids, sync_direction, sync_action, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(doc_id, collection_name, sync_direction) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    chroma_chunk_ids = excluded.chroma_chunk_ids,
                    sync_action = excluded.sync_action,
                    synced_at = excluded.synced_at",
                vec![
                    RowValue::Text(doc_id.to_string()),
                    RowValue::Text(collection.to_string()),
                    RowValue::Text(content_hash.to_string()),
                    RowValue::Text(chunk_ids_json),
                    RowValue::Text(direction_to_str(direction).to_string()),
                    RowValue::Text(action_to_str(action).to_string()),
                    RowValue::Integer(Utc::now().timestamp()),
                ],
            ))
            .await
    }

    /// Thin passthrough to the legacy `chroma_sync_state` table inside the
    /// versioning engine itself. The canonical sync-state store is C2
    /// (`engine::syncstate`); this exists only for call sites ported from
    /// code that read sync state off the versioned engine directly.
    pub async fn update_sync_state(&self, collection: &str, record: &SyncStateRecord) -> Result<()> {
        self.versioning
            .execute(&Statement::new(
                "INSERT INTO chroma_sync_state
                    (collection_name, last_sync_commit, last_sync_at, document_count, chunk_count, sync_status, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(collection_name) DO UPDATE SET
                    last_sync_commit = excluded.last_sync_commit,
                    last_sync_at = excluded.last_sync_at,
                    document_count = excluded.document_count,
                    chunk_count = excluded.chunk_count,
                    sync_status = excluded.sync_status,
                    error_message = excluded.error_message",
                vec![
                    RowValue::Text(collection.to_string()),
                    record.last_sync_commit.clone().map(RowValue::Text).unwrap_or(RowValue::Null),
                    record.last_sync_at.map(|t| RowValue::Integer(t.timestamp())).unwrap_or(RowValue::Null),
                    RowValue::Integer(record.document_count as i64),
                    RowValue::Integer(record.chunk_count as i64),
                    RowValue::Text(status_to_str(record.sync_status).to_string()),
                    record.error_message.clone().map(RowValue::Text).unwrap_or(RowValue::Null),
                ],
            ))
            .await
    }

    pub async fn get_sync_state(&self, repo_path: &str, branch: &str, collection: &str) -> Result<Option<SyncStateRecord>> {
        let rows = empty_on_missing_table(
            self.versioning
                .query(
                    "SELECT last_sync_commit, last_sync_at, document_count, chunk_count, sync_status, error_message
                     FROM chroma_sync_state WHERE collection_name = ?1",
                    &[RowValue::Text(collection.to_string())],
                )
                .await,
        )
        .await?;
        Ok(rows.first().map(|r| SyncStateRecord {
            repo_path: repo_path.to_string(),
            branch: branch.to_string(),
            collection_name: collection.to_string(),
            last_sync_commit: r.get_string("last_sync_commit"),
            last_sync_at: r.get_i64("last_sync_at").and_then(|t| chrono::Utc.timestamp_opt(t, 0).single()),
            document_count: r.get_i64("document_count").unwrap_or(0) as u64,
            chunk_count: r.get_i64("chunk_count").unwrap_or(0) as u64,
            sync_status: str_to_status(r.get_string("sync_status").as_deref().unwrap_or("in_progress")),
            error_message: r.get_string("error_message"),
        }))
    }

    async fn sync_log_hashes(&self, collection: &str, direction: SyncDirection) -> Result<std::collections::HashMap<String, String>> {
        let rows = empty_on_missing_table(
            self.versioning
                .query(
                    "SELECT doc_id, content_hash FROM document_sync_log
                     WHERE collection_name = ?1 AND sync_direction = ?2",
                    &[RowValue::Text(collection.to_string()), RowValue::Text(direction_to_str(direction).to_string())],
                )
                .await,
        )
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Some((r.get_string("doc_id")?, r.get_string("content_hash")?)))
            .collect())
    }
}

fn row_to_document(row: &Row) -> Option<Document> {
    Some(Document {
        doc_id: row.get_string("doc_id")?,
        collection_name: row.get_string("collection_name")?,
        content: row.get_string("content").unwrap_or_default(),
        content_hash: row.get_string("content_hash")?,
        title: row.get_string("title"),
        doc_type: row.get_string("doc_type"),
        metadata: row.metadata_json().and_then(|v| serde_json::from_value(v).ok()).unwrap_or_else(Metadata::new),
    })
}

fn direction_to_str(direction: SyncDirection) -> &'static str {
    match direction {
        SyncDirection::VersionedToVector => "versioned_to_vector",
        SyncDirection::VectorToVersioned => "vector_to_versioned",
    }
}

fn action_to_str(action: SyncAction) -> &'static str {
    match action {
        SyncAction::Added => "added",
        SyncAction::Modified => "modified",
        SyncAction::Deleted => "deleted",
    }
}

fn status_to_str(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Synced => "synced",
        SyncStatus::InProgress => "in_progress",
        SyncStatus::Failed => "failed",
    }
}

fn str_to_status(s: &str) -> SyncStatus {
    match s {
        "synced" => SyncStatus::Synced,
        "failed" => SyncStatus::Failed,
        _ => SyncStatus::InProgress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite_versioning::SqliteVersioningClient;

    async fn seeded_client() -> Arc<dyn VersioningEngineClient> {
        let client: Arc<dyn VersioningEngineClient> = Arc::new(SqliteVersioningClient::open_in_memory().unwrap());
        client
            .execute(&Statement::new(
                "INSERT INTO documents (doc_id, collection_name, content, content_hash) VALUES (?1, ?2, ?3, ?4)",
                vec![
                    RowValue::Text("d1".into()),
                    RowValue::Text("col1".into()),
                    RowValue::Text("hello".into()),
                    RowValue::Text(crate::chunk::content_hash("hello")),
                ],
            ))
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn pending_sync_documents_reports_new_when_log_is_empty() {
        let client = seeded_client().await;
        let detector = VersionedToVectorDetector::new(client);

        let pending = detector.pending_sync_documents("col1").await.unwrap();
        assert_eq!(pending.new.len(), 1);
        assert!(pending.modified.is_empty());
    }

    #[tokio::test]
    async fn pending_sync_documents_reports_modified_after_hash_change() {
        let client = seeded_client().await;
        let detector = VersionedToVectorDetector::new(client.clone());

        detector
            .record_sync("d1", "col1", &crate::chunk::content_hash("hello"), &[], SyncDirection::VersionedToVector, SyncAction::Added)
            .await
            .unwrap();

        client
            .execute(&Statement::new(
                "UPDATE documents SET content = ?1, content_hash = ?2 WHERE doc_id = 'd1'",
                vec![RowValue::Text("hello!".into()), RowValue::Text(crate::chunk::content_hash("hello!"))],
            ))
            .await
            .unwrap();

        let pending = detector.pending_sync_documents("col1").await.unwrap();
        assert!(pending.new.is_empty());
        assert_eq!(pending.modified.len(), 1);
    }

    #[tokio::test]
    async fn deleted_documents_detects_log_entries_with_no_row() {
        let client = seeded_client().await;
        let detector = VersionedToVectorDetector::new(client.clone());
        detector
            .record_sync("d1", "col1", &crate::chunk::content_hash("hello"), &[], SyncDirection::VersionedToVector, SyncAction::Added)
            .await
            .unwrap();

        client
            .execute(&Statement::new("DELETE FROM documents WHERE doc_id = 'd1'", vec![]))
            .await
            .unwrap();

        let deleted = detector.deleted_documents("col1").await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].doc_id, "d1");
    }

    #[tokio::test]
    async fn available_collections_is_sorted_and_deduplicated() {
        let client = seeded_client().await;
        let detector = VersionedToVectorDetector::new(client.clone());
        client
            .execute(&Statement::new(
                "INSERT INTO documents (doc_id, collection_name, content, content_hash) VALUES ('d2','col0','x','h')",
                vec![],
            ))
            .await
            .unwrap();

        let cols = detector.available_collections().await.unwrap();
        assert_eq!(cols, vec!["col0".to_string(), "col1".to_string()]);
    }
}
