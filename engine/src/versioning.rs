//! §6: the versioning-engine client capability set. An abstract async
//! trait; the only implementation shipped in this crate is the reference
//! `backend::sqlite_versioning::SqliteVersioningClient` (§6.1). A real
//! client for a networked Dolt-like server implements the same trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::row::{Row, Statement};

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub success: bool,
    pub hash: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub success: bool,
    pub error: Option<String>,
}

/// Returned by `checkout`/`reset_hard` when the versioning engine reports
/// unstaged or staged local changes blocking the operation.
pub const UNCOMMITTED_CHANGES_DIAGNOSTIC: &str = "uncommitted local changes";

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub success: bool,
    pub has_conflicts: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub has_staged_changes: bool,
    pub has_unstaged_changes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone)]
pub struct DiffRow {
    pub kind: DiffKind,
    pub row: Row,
}

#[derive(Debug, Clone)]
pub struct VersioningConflict {
    pub doc_id: String,
    pub ours: Row,
    pub theirs: Row,
}

#[async_trait]
pub trait VersioningEngineClient: Send + Sync {
    async fn query(&self, sql: &str, params: &[crate::row::RowValue]) -> Result<Vec<Row>>;
    async fn execute(&self, stmt: &Statement) -> Result<()>;

    async fn current_branch(&self) -> Result<String>;
    async fn head_commit(&self) -> Result<Option<String>>;
    async fn status(&self) -> Result<StatusReport>;

    async fn add(&self, table: &str) -> Result<()>;
    async fn add_all(&self) -> Result<()>;
    async fn commit(&self, message: &str) -> Result<CommitOutcome>;

    async fn checkout(&self, reference: &str, create_new: bool) -> Result<CheckoutOutcome>;
    async fn reset_hard(&self, reference: &str) -> Result<()>;
    async fn reset_soft(&self, reference: &str) -> Result<()>;

    async fn merge(&self, reference: &str) -> Result<MergeOutcome>;
    async fn pull(&self, remote: &str) -> Result<()>;
    async fn push(&self, remote: &str, branch: &str) -> Result<PushOutcome>;
    async fn fetch(&self) -> Result<()>;
    async fn clone_repo(&self, url: &str) -> Result<()>;

    async fn is_initialized(&self) -> Result<bool>;
    async fn get_conflicts(&self, table: &str) -> Result<Vec<VersioningConflict>>;

    /// Native `DIFF(from, to, table)` relation.
    async fn diff(&self, from_commit: &str, to_commit: &str, table: &str) -> Result<Vec<DiffRow>>;
}
