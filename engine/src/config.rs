use std::time::Duration;

/// Layered engine configuration. Loaded once at startup and carried inside
/// `RepositoryContext`; never read from the environment again after that.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default split size for C1, in `char`s (spec default 512).
    pub chunk_size: usize,
    /// Default overlap for C1, in `char`s (spec default 50).
    pub chunk_overlap: usize,
    /// Width of the semaphore bounding concurrent per-collection change
    /// detection (§5).
    pub detection_concurrency: usize,
    /// Hard deadline for a full multi-collection detection pass (§5: 45s).
    pub detection_deadline: Duration,
    /// Per-backend-call timeout (§5 default: 30s).
    pub backend_timeout: Duration,
    /// Capacity of the `VectorStoreWorker` request channel (§5.1).
    pub worker_queue_capacity: usize,
    /// Queue depth past which the worker emits a throttled warning (§5.1).
    pub worker_queue_warn_threshold: u64,
    /// Default for `preserve_local_changes` on checkout, absent an
    /// explicit call-site override.
    pub carry_mode_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::chunk::DEFAULT_CHUNK_OVERLAP,
            detection_concurrency: 4,
            detection_deadline: Duration::from_secs(45),
            backend_timeout: Duration::from_secs(30),
            worker_queue_capacity: 256,
            worker_queue_warn_threshold: 64,
            carry_mode_default: false,
        }
    }
}

impl EngineConfig {
    /// Overlays environment variables (loaded via `dotenvy` by the caller)
    /// onto the defaults. Unset or unparsable variables fall back silently
    /// to the default — configuration errors here are not worth failing a
    /// pipeline over.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("VECSYNC_CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("VECSYNC_CHUNK_OVERLAP") {
            if let Ok(n) = v.parse() {
                cfg.chunk_overlap = n;
            }
        }
        if let Ok(v) = std::env::var("VECSYNC_DETECTION_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                cfg.detection_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("VECSYNC_DETECTION_DEADLINE_SECS") {
            if let Ok(n) = v.parse() {
                cfg.detection_deadline = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("VECSYNC_BACKEND_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.backend_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("VECSYNC_CARRY_MODE_DEFAULT") {
            cfg.carry_mode_default = matches!(v.as_str(), "1" | "true" | "yes");
        }

        cfg
    }
}
