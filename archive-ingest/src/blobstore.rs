//! Azure Blob Storage as an [`ObjectStore`].
//!
//! Each item becomes one block blob written with a single `PUT`. The body is streamed
//! from disk. The credential is a SAS token appended to the blob URL, and the object id
//! is that URL without the token. Unless overwriting is enabled, `If-None-Match: *`
//! makes the service refuse to replace an existing blob.

use archive_ingest_core::contract::{AccessToken, ObjectStore, PutObjectRequest, PutReceipt};
use archive_ingest_core::error::ObjectStoreError;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Body, StatusCode, Url};
use secrecy::ExposeSecret;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

pub const BLOB_API_VERSION: &str = "2021-08-06";

#[derive(Debug, Clone)]
pub struct BlobStoreClient {
    http: reqwest::Client,
    account_url: Url,
}

impl BlobStoreClient {
    pub fn new(http: reqwest::Client, account_url: &str) -> Result<Self, ObjectStoreError> {
        let account_url = Url::parse(account_url).map_err(|e| ObjectStoreError::Malformed {
            status: 0,
            message: format!("invalid account url '{account_url}': {e}"),
        })?;
        info!(account_url = %account_url, "Initialized BlobStoreClient");
        Ok(Self { http, account_url })
    }

    /// `{account}/{container}/{key}` with every path segment percent-encoded.
    pub fn blob_url(&self, container: &str, key: &str) -> Result<Url, ObjectStoreError> {
        let mut url = self.account_url.clone();
        url.set_query(None);
        {
            let mut segments = url.path_segments_mut().map_err(|_| ObjectStoreError::Malformed {
                status: 0,
                message: format!("account url {} cannot hold a path", self.account_url),
            })?;
            segments.pop_if_empty().push(container);
            segments.extend(key.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }
}

/// Maps a failed blob response onto the store error taxonomy.
///
/// `error_code` is the `x-ms-error-code` header, when the service sent one.
pub fn classify_status(
    status: u16,
    error_code: Option<&str>,
    key: &str,
    message: String,
) -> ObjectStoreError {
    let code = error_code.unwrap_or_default();
    if code.contains("Quota") {
        return ObjectStoreError::QuotaExceeded(format!("{code}: {message}"));
    }
    match status {
        409 | 412 => ObjectStoreError::Conflict {
            key: key.to_string(),
        },
        429 => ObjectStoreError::Throttled(format!("{status} {code}: {message}")),
        503 if code == "ServerBusy" => ObjectStoreError::Throttled(format!("{status} {code}: {message}")),
        408 => ObjectStoreError::Timeout(format!("{status} {code}: {message}")),
        500 | 502 | 503 | 504 => ObjectStoreError::ServerBusy { status, message },
        401 | 403 => ObjectStoreError::Unauthorized(format!("{status} {code}: {message}")),
        _ => ObjectStoreError::Malformed { status, message },
    }
}

fn transport_error(e: reqwest::Error) -> ObjectStoreError {
    if e.is_timeout() {
        ObjectStoreError::Timeout(e.to_string())
    } else {
        ObjectStoreError::Network(e.to_string())
    }
}

#[async_trait]
impl ObjectStore for BlobStoreClient {
    async fn put_object(
        &self,
        request: PutObjectRequest,
        token: &AccessToken,
    ) -> Result<PutReceipt, ObjectStoreError> {
        let blob_url = self.blob_url(&request.container, &request.key)?;
        let mut signed = blob_url.clone();
        signed.set_query(Some(token.expose_secret().trim_start_matches('?')));

        let file = tokio::fs::File::open(&request.source)
            .await
            .map_err(|e| ObjectStoreError::Source {
                path: request.source.clone(),
                message: e.to_string(),
            })?;
        let body = Body::wrap_stream(ReaderStream::new(file));

        let mut builder = self
            .http
            .put(signed)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", BLOB_API_VERSION)
            .header(CONTENT_LENGTH, request.content_length)
            .header(CONTENT_TYPE, request.content_type.as_str())
            .body(body);
        if !request.overwrite {
            builder = builder.header(IF_NONE_MATCH, "*");
        }
        if let Some(sha256) = request.sha256.as_deref() {
            builder = builder.header("x-ms-meta-sha256", sha256);
        }

        debug!(url = %blob_url, bytes = request.content_length, "[UPLOAD] PUT block blob");
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::CREATED {
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(PutReceipt {
                object_id: blob_url.to_string(),
                etag,
            });
        }

        let error_code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let message = response.text().await.unwrap_or_default();
        warn!(
            url = %blob_url,
            status = status.as_u16(),
            error_code = ?error_code,
            "[UPLOAD] Blob service rejected PUT"
        );
        Err(classify_status(
            status.as_u16(),
            error_code.as_deref(),
            &request.key,
            message,
        ))
    }
}
