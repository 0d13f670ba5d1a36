//! Error types for keesync-core.

use std::path::PathBuf;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while loading jobs or synchronizing databases.
///
/// Every variant is scoped to a single job or target: the orchestrator
/// catches them at the job boundary and turns them into warnings.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A job record is missing a required field or points at nothing.
    #[error("Job '{job}': {reason}")]
    ConfigValidation { job: String, reason: String },

    /// The database could not be unlocked with the given credential.
    #[error("Cannot unlock {}: {reason}", path.display())]
    Credential { path: PathBuf, reason: String },

    /// The database file does not exist.
    #[error("Database not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Reading or writing the database failed.
    #[error("Store error on {}: {reason}", path.display())]
    StoreIo { path: PathBuf, reason: String },

    /// A field reference could not be resolved.
    #[error("Unresolved field reference: {reference}")]
    ReferenceResolution { reference: String },
}

impl SyncError {
    pub(crate) fn config(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigValidation {
            job: job.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn store_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::StoreIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
