use std::path::PathBuf;
use thiserror::Error;

use crate::scanner::ScanError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Scan error: {0}")]
    Scan(ScanError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ScanError> for IngestError {
    /// Store and layout failures keep their own variant so `is_fatal` and
    /// `exit_code` see them regardless of which phase raised them.
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Store(e) => IngestError::Store(e),
            ScanError::Layout(e) => IngestError::Layout(e),
            other => IngestError::Scan(other),
        }
    }
}

impl IngestError {
    /// Whether the error aborts the whole invocation.
    ///
    /// Per-item and per-job failures never surface as an `IngestError`, so
    /// everything reaching the caller is fatal except a user error such as a
    /// duplicate project name or an unknown id.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IngestError::Store(StoreError::ConstraintViolation(_))
                | IngestError::Store(StoreError::NotFound { .. })
                | IngestError::Config(_)
        )
    }

    /// Process exit status for the invoking command.
    pub fn exit_code(&self) -> i32 {
        match self {
            IngestError::Config(_) => 78,
            IngestError::Store(StoreError::ConstraintViolation(_))
            | IngestError::Store(StoreError::NotFound { .. }) => 65,
            IngestError::Store(StoreError::StorageUnavailable { .. }) => 75,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run '{command}': {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, IngestError>;
