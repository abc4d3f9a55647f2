//! # upload: one item into the object store, with retry and cancellation
//!
//! [`UploadClient`] turns a ready item into a [`PutObjectRequest`] under a key derived
//! only from the item's relative path (see [`object_key`]), so re-running a batch
//! targets the same objects. Transient store errors are retried according to the
//! [`RetryPolicy`]; permanent ones end the item at once. The credential is resolved
//! through the [`SecretProvider`] before every attempt, so a token that expires during
//! backoff is refreshed instead of being replayed. The cancellation token is observed
//! during credential resolution, the transfer and backoff; dropping the in-flight
//! `put_object` future closes the file stream it owns.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::contract::{
    InspectionResult, ObjectStore, PutObjectRequest, SecretStore, SkipReason, UploadOutcome,
};
use crate::discover::slash_path;
use crate::error::AuthError;
use crate::retry::RetryPolicy;
use crate::secrets::SecretProvider;

/// Where and how items are written.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    pub container: String,
    /// Optional key prefix, e.g. a batch folder.
    pub prefix: Option<String>,
    pub overwrite: bool,
    pub retry: RetryPolicy,
}

impl UploadConfig {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: None,
            overwrite: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Object key for a relative path: `/`-separated, leading `./` and `/` removed,
/// optionally under `prefix`.
pub fn object_key(prefix: Option<&str>, relative_path: &Path) -> String {
    let rel = slash_path(relative_path);
    let rel = rel.trim_start_matches("./").trim_start_matches('/');
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{rel}"),
        None => rel.to_string(),
    }
}

pub struct UploadClient<O> {
    store: Arc<O>,
    config: UploadConfig,
}

impl<O> std::fmt::Debug for UploadClient<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadClient").field("config", &self.config).finish()
    }
}

impl<O: ObjectStore> UploadClient<O> {
    pub fn new(store: Arc<O>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    pub fn key_for(&self, relative_path: &Path) -> String {
        object_key(self.config.prefix.as_deref(), relative_path)
    }

    /// Uploads one inspected item.
    ///
    /// Returns a terminal outcome for everything the store or the token decides. An
    /// `Err` means the credential `secret_name` could not be resolved before some
    /// attempt; the caller decides what that does to the rest of the batch.
    pub async fn upload<S: SecretStore>(
        &self,
        inspection: &InspectionResult,
        secrets: &SecretProvider<S>,
        secret_name: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, AuthError> {
        let item = &inspection.item;
        let key = self.key_for(&item.relative_path);
        let request = PutObjectRequest {
            container: self.config.container.clone(),
            key: key.clone(),
            source: item.path.clone(),
            content_length: item.size,
            content_type: inspection.content_type.clone(),
            sha256: inspection.sha256.clone(),
            overwrite: self.config.overwrite,
        };
        let max_attempts = self.config.retry.attempts();
        let mut attempt = 0;

        loop {
            let credential = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(key = %key, attempt, "[UPLOAD] Cancelled while resolving credential");
                    return Ok(cancelled(inspection, attempt));
                }
                resolved = secrets.resolve(secret_name) => resolved?,
            };

            attempt += 1;
            info!(key = %key, attempt, max_attempts, "[UPLOAD] Putting object");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(key = %key, attempt, "[UPLOAD] Cancelled during transfer");
                    return Ok(cancelled(inspection, attempt));
                }
                result = self.store.put_object(request.clone(), credential.token()) => result,
            };

            match result {
                Ok(receipt) => {
                    info!(key = %key, object_id = %receipt.object_id, etag = ?receipt.etag, attempt, "[UPLOAD] Stored");
                    return Ok(UploadOutcome::succeeded(item.clone(), receipt.object_id, attempt)
                        .with_page_count(inspection.page_count));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(key = %key, attempt, error = %e, ?delay, "[UPLOAD] Transient failure, backing off");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            warn!(key = %key, attempt, "[UPLOAD] Cancelled during backoff");
                            return Ok(cancelled(inspection, attempt));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(key = %key, attempt, error = %e, transient = e.is_transient(), "[UPLOAD] Giving up");
                    return Ok(UploadOutcome::failed(item.clone(), attempt, e.to_string())
                        .with_page_count(inspection.page_count));
                }
            }
        }
    }
}

fn cancelled(inspection: &InspectionResult, attempt: u32) -> UploadOutcome {
    UploadOutcome::skipped(
        inspection.item.clone(),
        SkipReason::Cancelled,
        Some("upload cancelled".to_string()),
    )
    .with_attempts(attempt)
    .with_page_count(inspection.page_count)
}
