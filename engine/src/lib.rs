//! Bidirectional sync engine between a vector document store and a
//! SQL-schema versioning engine.
//!
//! The module letters below (C1-C7) mirror the component breakdown this
//! crate was designed against; see `SPEC_FULL.md` at the workspace root
//! for the full write-up of each one's responsibilities.

pub mod backend;
pub mod chunk;
pub mod config;
pub mod context;
pub mod delta;
pub mod deletions;
pub mod error;
pub mod model;
pub mod row;
pub mod stager;
pub mod sync_manager;
pub mod syncstate;
pub mod vectorstore;
pub mod versioning;
pub mod worker;

pub use backend::memory_vector_store::InMemoryVectorStore;
pub use backend::sqlite_versioning::SqliteVersioningClient;
pub use chunk::ChunkParams;
pub use config::EngineConfig;
pub use context::RepositoryContext;
pub use deletions::DeletionTracker;
pub use error::{Result, SyncError};
pub use model::{
    Chunk, Collection, ConflictEntry, DeletedDoc, DeletionOperationType, DeletionRecord, Document,
    LocalChanges, Metadata, PipelineStatus, SyncAction, SyncDirection, SyncResult,
    SyncStateRecord, SyncStatus, VersionedChanges,
};
pub use row::{Row, RowValue, Statement};
pub use stager::Stager;
pub use sync_manager::SyncManager;
pub use syncstate::SyncStateStore;
pub use vectorstore::{GetResult, VectorStoreClient, WhereClause};
pub use versioning::{
    CheckoutOutcome, CommitOutcome, DiffKind, DiffRow, MergeOutcome, PushOutcome, StatusReport,
    VersioningConflict, VersioningEngineClient, UNCOMMITTED_CHANGES_DIAGNOSTIC,
};
pub use worker::VectorStoreWorker;
