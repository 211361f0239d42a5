use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User metadata attached to a document or chunk: a flat string-keyed map of
/// scalar JSON values.
pub type Metadata = HashMap<String, Value>;

/// A logical document as stored in the versioning engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub doc_id: String,
    pub collection_name: String,
    pub content: String,
    pub content_hash: String,
    pub title: Option<String>,
    pub doc_type: Option<String>,
    pub metadata: Metadata,
}

/// A document seen as deleted, carrying what we knew about it before it
/// disappeared (needed so a deletion can be staged and, later, diagnosed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedDoc {
    pub doc_id: String,
    pub collection_name: String,
    pub original_content_hash: Option<String>,
}

/// A physical chunk as stored in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub source_id: String,
    pub collection_name: String,
    pub content_hash: String,
    pub dolt_commit: Option<String>,
    pub is_local_change: bool,
    pub metadata: Metadata,
}

/// A named container of documents in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collection {
    pub collection_name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub embedding_model: Option<String>,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub document_count: u64,
    pub metadata: Metadata,
}

impl Collection {
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            display_name: None,
            description: None,
            embedding_model: None,
            chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE as u32,
            chunk_overlap: crate::chunk::DEFAULT_CHUNK_OVERLAP as u32,
            document_count: 0,
            metadata: Metadata::new(),
        }
    }
}

/// One per `(doc_id, collection, direction)`: what the vector side has
/// already seen for a document, used as the baseline for §4.4 detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncLogEntry {
    pub doc_id: String,
    pub collection_name: String,
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
    pub direction: SyncDirection,
    pub sync_action: SyncAction,
    pub synced_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SyncDirection {
    VersionedToVector,
    VectorToVersioned,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Synced,
    InProgress,
    Failed,
}

/// One row of `chroma_sync_state`/C2: what commit a `(repo, branch,
/// collection)` triple has been synchronized to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStateRecord {
    pub repo_path: String,
    pub branch: String,
    pub collection_name: String,
    pub last_sync_commit: Option<String>,
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
    pub document_count: u64,
    pub chunk_count: u64,
    pub sync_status: SyncStatus,
    pub error_message: Option<String>,
}

impl SyncStateRecord {
    pub fn new(repo_path: impl Into<String>, branch: impl Into<String>, collection_name: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            branch: branch.into(),
            collection_name: collection_name.into(),
            last_sync_commit: None,
            last_sync_at: None,
            document_count: 0,
            chunk_count: 0,
            sync_status: SyncStatus::InProgress,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeletionOperationType {
    DocumentDelete,
    Deletion,
    Rename,
    MetadataUpdate,
}

/// A deletion or collection-level operation the vector store can no longer
/// prove happened; C3's append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionRecord {
    pub id: i64,
    pub repository_path: String,
    pub collection_name: String,
    pub doc_id: Option<String>,
    pub operation_type: DeletionOperationType,
    pub original_content_hash: Option<String>,
    pub original_name: Option<String>,
    pub new_name_or_metadata: Option<String>,
    pub is_committed: bool,
}

/// Output of C5: what the vector store has that the versioning engine
/// doesn't yet, grouped by the operation it implies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalChanges {
    pub new: Vec<Document>,
    pub modified: Vec<Document>,
    pub deleted: Vec<DeletedDoc>,
}

impl LocalChanges {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len()
    }
}

/// Output of C4: what the versioning engine has that the vector store
/// doesn't yet, expressed as a commit-to-commit diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedChanges {
    pub added: Vec<Document>,
    pub modified: Vec<Document>,
    pub removed: Vec<DeletedDoc>,
}

impl VersionedChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// One entry of a merge conflict, surfaced without mutating either store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictEntry {
    pub doc_id: String,
    pub collection_name: String,
    pub ours: Value,
    pub theirs: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineStatus {
    Completed,
    NoChanges,
    LocalChangesExist,
    Conflicts,
    Failed,
}

/// Returned by every C7 pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub status: PipelineStatus,
    pub direction: Option<SyncDirection>,
    pub added: u64,
    pub modified: u64,
    pub deleted: u64,
    pub chunks_processed: u64,
    pub commit_hash: Option<String>,
    pub error: Option<String>,
    pub staged_from_vector: bool,
    pub local_changes: Option<LocalChanges>,
    pub conflicts: Vec<ConflictEntry>,
    /// Populated by the `status` pipeline; `None` for every other pipeline.
    pub branch: Option<String>,
    pub collection: Option<String>,
}

impl SyncResult {
    pub fn completed() -> Self {
        Self {
            status: PipelineStatus::Completed,
            direction: None,
            added: 0,
            modified: 0,
            deleted: 0,
            chunks_processed: 0,
            commit_hash: None,
            error: None,
            staged_from_vector: false,
            local_changes: None,
            conflicts: Vec::new(),
            branch: None,
            collection: None,
        }
    }

    pub fn no_changes() -> Self {
        Self {
            status: PipelineStatus::NoChanges,
            ..Self::completed()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::Failed,
            error: Some(message.into()),
            ..Self::completed()
        }
    }
}
