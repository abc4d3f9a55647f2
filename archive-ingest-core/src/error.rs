//! Error taxonomy for the ingestion pipeline.
//!
//! Errors fall in three bands:
//! - item-level and non-fatal: [`InspectionError`], [`ObjectStoreError`]. They end up inside
//!   the item's outcome and never interrupt sibling items.
//! - batch-fatal: [`AuthError`]. Without a credential no upload can succeed, so the
//!   orchestrator stops scheduling new work.
//! - setup: [`IngestError`], raised before a batch starts (e.g. a missing source root).
//!
//! Unreadable entries met during discovery are logged as warnings, not raised.

use std::path::PathBuf;
use thiserror::Error;

/// Why a document could not be accepted by the inspector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InspectionError {
    /// The file went away (or became unreadable) between discovery and inspection.
    #[error("cannot read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// Extension is neither a parsable document nor a pass-through format.
    #[error("unsupported format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The document could not be parsed.
    #[error("corrupt document {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// The document parsed but has nothing in it.
    #[error("document {path} has no pages")]
    Empty { path: PathBuf },

    /// The blocking inspection task died.
    #[error("inspection task failed for {path}: {message}")]
    Task { path: PathBuf, message: String },
}

/// Errors from the remote secret store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("access to secret '{name}' denied: {message}")]
    AccessDenied { name: String, message: String },

    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// A credential could not be resolved. Batch-fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot resolve credential '{name}': {source}")]
pub struct AuthError {
    pub name: String,
    #[source]
    pub source: SecretStoreError,
}

/// Errors from the remote object store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// Rate limited by the remote endpoint.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Remote reported a temporary server-side failure.
    #[error("server busy ({status}): {message}")]
    ServerBusy { status: u16, message: String },

    /// Transport-level timeout.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The object already exists and overwriting was not requested.
    #[error("object '{key}' already exists")]
    Conflict { key: String },

    /// The request was rejected as invalid (bad key, too large, bad headers).
    #[error("malformed request ({status}): {message}")]
    Malformed { status: u16, message: String },

    /// The local content could not be read for streaming.
    #[error("cannot read source {path}: {message}")]
    Source { path: PathBuf, message: String },
}

impl ObjectStoreError {
    /// Transient errors are likely to succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ObjectStoreError::Throttled(_)
                | ObjectStoreError::ServerBusy { .. }
                | ObjectStoreError::Timeout(_)
                | ObjectStoreError::Network(_)
        )
    }
}

/// Failures that prevent a batch from starting at all.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source root {0} is not a readable directory")]
    SourceRoot(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The blocking discovery task died.
    #[error("discovery failed: {0}")]
    Discovery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ObjectStoreError::Throttled("429".into()).is_transient());
        assert!(ObjectStoreError::Timeout("slow".into()).is_transient());
        assert!(ObjectStoreError::ServerBusy {
            status: 503,
            message: "ServerBusy".into()
        }
        .is_transient());
        assert!(!ObjectStoreError::Unauthorized("403".into()).is_transient());
        assert!(!ObjectStoreError::Conflict { key: "a.pdf".into() }.is_transient());
        assert!(!ObjectStoreError::QuotaExceeded("full".into()).is_transient());
    }

    #[test]
    fn auth_error_names_the_credential() {
        let err = AuthError {
            name: "blob-sas".into(),
            source: SecretStoreError::NotFound("blob-sas".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("blob-sas"), "got: {msg}");
    }
}
