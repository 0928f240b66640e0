//! Error types for artifact resolution

use depot_core::CoreError;
use thiserror::Error;

/// Artifact resolution errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Lookup Errors ============
    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: String },

    #[error("Storage not found: {id}")]
    StorageNotFound { id: String },

    #[error("Repository not found: {storage}:{id}")]
    RepositoryNotFound { storage: String, id: String },

    // ============ Repository State Errors ============
    #[error("Repository is out of service: {repository}")]
    RepositoryOutOfService { repository: String },

    #[error("Operation '{operation}' is not supported by {repository}")]
    UnsupportedOperation {
        operation: String,
        repository: String,
    },

    #[error("Artifact cannot be stored: {path} ({reason})")]
    ArtifactCannotBeStored { path: String, reason: String },

    #[error("Configuration inconsistency: {message}")]
    ConfigurationInconsistency { message: String },

    // ============ Remote Errors ============
    #[error("Remote does not support byte ranges, cannot resume {url} at offset {offset}")]
    RangeNotSupported { url: String, offset: u64 },

    #[error("Transient I/O failure: {message}")]
    TransientIo { message: String },

    #[error("Request timeout: {url}")]
    Timeout { url: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Invalid redirect from {url}: {reason}")]
    InvalidRedirect { url: String, reason: String },

    // ============ Integrity Errors ============
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // ============ Path / Index Errors ============
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Artifact index error: {message}")]
    IndexError { message: String },

    // ============ Wrapped Errors ============
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Whether a remote fetch may be retried after this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepoError::TransientIo { .. } | RepoError::Timeout { .. } | RepoError::NetworkError { .. }
        )
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            RepoError::Timeout { url }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_body() || e.is_decode() {
            RepoError::TransientIo {
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        RepoError::IndexError {
            message: e.to_string(),
        }
    }
}
