use std::time::Duration;

use crate::model::{ConflictEntry, LocalChanges};

/// Error taxonomy shared by every pipeline in this crate.
///
/// Library code always returns `Result<_, SyncError>`; `anyhow` is reserved
/// for the CLI boundary (see `vecsync-cli`), not used inside the engine.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Fresh repository, no `documents` table yet. Detector layers convert
    /// this to an empty result rather than propagating it; it is only
    /// constructed where that conversion happens.
    #[error("table not found")]
    TableNotFound,

    #[error("checkout blocked by {} local changes", .0.total())]
    CheckoutBlockedByLocalChanges(Box<LocalChanges>),

    #[error("merge produced {} conflicts", .0.len())]
    MergeConflict(Vec<ConflictEntry>),

    #[error("chunk reassembly failed: {0}")]
    ReassemblyError(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("ambiguous collection: {0}")]
    NoCollection(String),

    #[error("validation warning: {0}")]
    ValidationWarning(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        let message = e.to_string();
        if message.contains("no such table") {
            return SyncError::TableNotFound;
        }
        SyncError::BackendUnavailable(message)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::BackendUnavailable(e.to_string())
    }
}

