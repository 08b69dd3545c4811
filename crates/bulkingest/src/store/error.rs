//! Store error types.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness or integrity rule was violated (e.g. duplicate project name).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// An unknown project, document or job id.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The caller no longer holds the lease on the job.
    #[error("Lease lost on job {job_id} for worker '{worker_id}'")]
    LeaseLost { job_id: i64, worker_id: String },

    /// Disk or lock failure. `busy` marks lock contention that may clear on retry.
    #[error("Storage unavailable: {reason}")]
    StorageUnavailable { reason: String, busy: bool },

    /// Any other SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be decoded.
    #[error("Corrupt row in '{table}': {reason}")]
    CorruptRow { table: &'static str, reason: String },

    /// The connection lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable { busy: true, .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StoreError::ConstraintViolation(err.to_string()),
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::StorageUnavailable {
                    reason: err.to_string(),
                    busy: true,
                }
            }
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::SystemIoFailure)
            | Some(ErrorCode::DiskFull)
            | Some(ErrorCode::ReadOnly)
            | Some(ErrorCode::PermissionDenied)
            | Some(ErrorCode::DatabaseCorrupt)
            | Some(ErrorCode::NotADatabase) => StoreError::StorageUnavailable {
                reason: err.to_string(),
                busy: false,
            },
            _ => StoreError::Sqlite(err),
        }
    }
}
