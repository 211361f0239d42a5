//! §9 re-architecture note "Global state": sync-state, deletion tracking,
//! and the backend client handles are bundled into one explicit value
//! constructed once at startup, instead of being process-wide singletons.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::deletions::DeletionTracker;
use crate::syncstate::SyncStateStore;
use crate::versioning::VersioningEngineClient;
use crate::worker::VectorStoreWorker;

/// Everything a C7 pipeline needs, gathered once instead of reached for
/// through global state.
pub struct RepositoryContext {
    pub repo_path: PathBuf,
    pub versioning: Arc<dyn VersioningEngineClient>,
    pub vector_store: VectorStoreWorker,
    pub sync_state: Arc<SyncStateStore>,
    pub deletions: Arc<DeletionTracker>,
    pub config: EngineConfig,
    /// Serializes any pipeline that mutates either backend, per §5.
    pub pipeline_lock: Arc<Mutex<()>>,
}

impl RepositoryContext {
    pub fn new(
        repo_path: PathBuf,
        versioning: Arc<dyn VersioningEngineClient>,
        vector_store: VectorStoreWorker,
        sync_state: SyncStateStore,
        deletions: DeletionTracker,
        config: EngineConfig,
    ) -> Self {
        Self {
            repo_path,
            versioning,
            vector_store,
            sync_state: Arc::new(sync_state),
            deletions: Arc::new(deletions),
            config,
            pipeline_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn repo_path_str(&self) -> String {
        self.repo_path.to_string_lossy().to_string()
    }
}
