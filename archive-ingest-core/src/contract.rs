//! # contract: data model and collaborator interfaces
//!
//! The plain data flowing through a batch ([`SourceItem`], [`InspectionResult`],
//! [`Credential`], [`UploadOutcome`]) and the three seams the pipeline talks
//! through:
//! - [`SecretStore`]: fetch a named secret from a managed vault.
//! - [`ObjectStore`]: put a byte stream under a key in a container.
//! - [`DocumentBackend`]: open a document and read its page count.
//!
//! Real implementations live in the CLI crate (Azure) and in [`crate::inspect`]
//! (lopdf). The async traits are annotated for `mockall` so tests can script
//! remote behaviour.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{InspectionError, ObjectStoreError, SecretStoreError};

/// A file found by the discoverer. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceItem {
    /// Position in discovery (natural-sort) order, starting at 0.
    pub sequence: usize,
    pub path: PathBuf,
    /// Path relative to the source root; the object key is derived from it.
    pub relative_path: PathBuf,
    /// `/`-separated relative path, the key the discoverer sorted on.
    pub sort_key: String,
    pub size: u64,
    pub discovered_at: DateTime<Utc>,
}

/// What the inspector learned about one item.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionResult {
    pub item: SourceItem,
    pub page_count: Option<u32>,
    pub valid: bool,
    pub error: Option<InspectionError>,
    /// MIME type used for the upload.
    pub content_type: String,
    /// Hex SHA-256 of the inspected content, when it was read.
    pub sha256: Option<String>,
}

impl InspectionResult {
    pub fn invalid(item: SourceItem, error: InspectionError) -> Self {
        let content_type = content_type_for(&item.path).to_string();
        Self {
            item,
            page_count: None,
            valid: false,
            error: Some(error),
            content_type,
            sha256: None,
        }
    }
}

/// Maps a file extension to the content type sent to the object store.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "tif" | "tiff" => "image/tiff",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Secret material. Its `Debug` output is redacted by `secrecy`.
#[derive(Debug, Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }
}

impl ExposeSecret<str> for AccessToken {
    fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

/// What a [`SecretStore`] hands back.
#[derive(Debug, Clone)]
pub struct SecretValue {
    pub value: AccessToken,
    /// `None` when the store attaches no expiry to the secret.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A resolved credential, owned by the secret provider.
#[derive(Debug, Clone)]
pub struct Credential {
    pub name: String,
    pub value: AccessToken,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True once `now` is within `skew` of (or past) the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        now + skew >= self.expires_at
    }

    pub fn token(&self) -> &AccessToken {
        &self.value
    }
}

/// One object to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectRequest {
    pub container: String,
    pub key: String,
    /// Local file whose bytes are streamed as the object body.
    pub source: PathBuf,
    pub content_length: u64,
    pub content_type: String,
    pub sha256: Option<String>,
    /// When false the store must refuse to replace an existing object.
    pub overwrite: bool,
}

/// Returned by the object store on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    /// Stable identifier of the stored object (e.g. its URL without credentials).
    pub object_id: String,
    pub etag: Option<String>,
}

/// Terminal status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Why an item was not uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Inspection flagged the content as invalid.
    InvalidDocument,
    /// The batch lost its credential before this item was attempted.
    AuthFailure,
    /// The run was cancelled before this item finished.
    Cancelled,
    /// Uploading was switched off for this run.
    UploadDisabled,
}

/// Final word on one item. Exactly one per discovered item.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub item: SourceItem,
    pub remote_id: Option<String>,
    pub status: OutcomeStatus,
    pub skip_reason: Option<SkipReason>,
    pub attempts: u32,
    pub error: Option<String>,
    pub page_count: Option<u32>,
    pub finished_at: DateTime<Utc>,
}

impl UploadOutcome {
    pub fn succeeded(item: SourceItem, remote_id: String, attempts: u32) -> Self {
        Self {
            item,
            remote_id: Some(remote_id),
            status: OutcomeStatus::Succeeded,
            skip_reason: None,
            attempts,
            error: None,
            page_count: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(item: SourceItem, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            item,
            remote_id: None,
            status: OutcomeStatus::Failed,
            skip_reason: None,
            attempts,
            error: Some(error.into()),
            page_count: None,
            finished_at: Utc::now(),
        }
    }

    pub fn skipped(item: SourceItem, reason: SkipReason, error: Option<String>) -> Self {
        Self {
            item,
            remote_id: None,
            status: OutcomeStatus::Skipped,
            skip_reason: Some(reason),
            attempts: 0,
            error,
            page_count: None,
            finished_at: Utc::now(),
        }
    }

    pub fn with_page_count(mut self, page_count: Option<u32>) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Managed secret store (e.g. a key vault).
///
/// Implementations must map "no such secret" to [`SecretStoreError::NotFound`] and
/// authorization failures to [`SecretStoreError::AccessDenied`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretStoreError>;
}

/// Remote object storage.
///
/// Implementors stream `request.source` as the body and classify failures so that
/// [`ObjectStoreError::is_transient`] tells the retry loop what to do.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        request: PutObjectRequest,
        token: &AccessToken,
    ) -> Result<PutReceipt, ObjectStoreError>;
}

/// Opens documents for inspection. Called on the blocking pool.
pub trait DocumentBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn OpenDocument>, InspectionError>;
}

/// A document held open by a [`DocumentBackend`].
pub trait OpenDocument: Send {
    fn page_count(&self) -> Result<u32, InspectionError>;

    /// Hex SHA-256 of the bytes the document was read from, if known.
    fn sha256(&self) -> Option<String> {
        None
    }

    /// Releases whatever the backend holds for this document.
    fn close(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("sv=2021&sig=abc");
        let printed = format!("{token:?}");
        assert!(!printed.contains("sig=abc"), "{printed}");
        assert!(printed.contains("REDACTED"), "{printed}");
        assert_eq!(token.expose_secret(), "sv=2021&sig=abc");
    }

    #[test]
    fn credential_expiry_honours_skew() {
        let now = Utc::now();
        let cred = Credential {
            name: "sas".into(),
            value: AccessToken::new("x"),
            expires_at: now + chrono::Duration::seconds(20),
        };
        assert!(!cred.is_expired(now, chrono::Duration::zero()));
        assert!(cred.is_expired(now, chrono::Duration::seconds(30)));
        assert!(cred.is_expired(now + chrono::Duration::seconds(21), chrono::Duration::zero()));
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("a/B.PDF")), "application/pdf");
        assert_eq!(content_type_for(Path::new("scan.tif")), "image/tiff");
        assert_eq!(content_type_for(Path::new("notes")), "application/octet-stream");
    }
}
