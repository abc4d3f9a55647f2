//! Azure Key Vault as a [`SecretStore`].
//!
//! Secrets are read with `GET {vault}/secrets/{name}?api-version=7.4`, the name
//! percent-encoded as a single path segment. The bearer token
//! comes from an OAuth2 client-credentials exchange against Entra ID. It is cached
//! until shortly before it expires, so a batch normally performs one exchange.

use archive_ingest_core::contract::{AccessToken, SecretStore, SecretValue};
use archive_ingest_core::error::SecretStoreError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Url;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::load_config::AzureCredentials;

pub const KEYVAULT_API_VERSION: &str = "7.4";
pub const KEYVAULT_SCOPE: &str = "https://vault.azure.net/.default";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Renew the bearer this long before Entra ID says it expires.
const BEARER_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
    #[serde(default)]
    attributes: Option<SecretAttributes>,
}

#[derive(Debug, Deserialize)]
struct SecretAttributes {
    /// Unix seconds.
    exp: Option<i64>,
}

pub struct KeyVaultClient {
    http: reqwest::Client,
    vault_url: Url,
    credentials: AzureCredentials,
    bearer: Mutex<Option<(AccessToken, Instant)>>,
}

impl std::fmt::Debug for KeyVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultClient")
            .field("vault_url", &self.vault_url.as_str())
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl KeyVaultClient {
    pub fn new(
        http: reqwest::Client,
        vault_url: &str,
        credentials: AzureCredentials,
    ) -> Result<Self, SecretStoreError> {
        let parsed = Url::parse(vault_url)
            .map_err(|e| SecretStoreError::Unavailable(format!("invalid vault url '{vault_url}': {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(SecretStoreError::Unavailable(format!(
                "vault url '{vault_url}' cannot hold a path"
            )));
        }
        info!(vault_url = %parsed, client_id = %credentials.client_id, "Initialized KeyVaultClient");
        Ok(Self {
            http,
            vault_url: parsed,
            credentials,
            bearer: Mutex::new(None),
        })
    }

    /// `{vault}/secrets/{name}?api-version=...` with the name percent-encoded as one segment.
    pub fn secret_url(&self, name: &str) -> Url {
        let mut url = self.vault_url.clone();
        url.set_query(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("secrets").push(name);
        }
        url.query_pairs_mut().append_pair("api-version", KEYVAULT_API_VERSION);
        url
    }

    async fn bearer_token(&self) -> Result<AccessToken, SecretStoreError> {
        let mut cached = self.bearer.lock().await;
        if let Some((token, valid_until)) = cached.as_ref() {
            if Instant::now() < *valid_until {
                return Ok(token.clone());
            }
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            DEFAULT_AUTHORITY, self.credentials.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
            ("scope", KEYVAULT_SCOPE),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SecretStoreError::Unavailable(format!("token request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "[SECRETS] Token exchange refused");
            return Err(classify_token_status(status.as_u16(), &body));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SecretStoreError::Unavailable(format!("malformed token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(BEARER_SKEW);
        let access = AccessToken::new(token.access_token);
        *cached = Some((access.clone(), Instant::now() + lifetime));
        debug!(expires_in = token.expires_in, "[SECRETS] Bearer token acquired");
        Ok(access)
    }
}

/// Maps a failed token exchange: an outage stays retryable, anything else is a refusal.
pub fn classify_token_status(status: u16, body: &str) -> SecretStoreError {
    match status {
        408 | 429 | 500..=599 => {
            SecretStoreError::Unavailable(format!("token endpoint returned {status}: {body}"))
        }
        _ => SecretStoreError::AccessDenied {
            name: KEYVAULT_SCOPE.to_string(),
            message: format!("token endpoint returned {status}: {body}"),
        },
    }
}

/// Maps a failed Key Vault response onto the store error taxonomy.
pub fn classify_vault_status(status: u16, name: &str, body: &str) -> SecretStoreError {
    match status {
        404 => SecretStoreError::NotFound(name.to_string()),
        401 | 403 => SecretStoreError::AccessDenied {
            name: name.to_string(),
            message: format!("{status}: {body}"),
        },
        _ => SecretStoreError::Unavailable(format!("vault returned {status}: {body}")),
    }
}

fn expiry(attributes: Option<&SecretAttributes>) -> Option<DateTime<Utc>> {
    attributes
        .and_then(|a| a.exp)
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretStoreError> {
        let bearer = self.bearer_token().await?;
        let url = self.secret_url(name);
        info!(secret = name, "[SECRETS] Fetching secret from Key Vault");

        let response = self
            .http
            .get(url)
            .bearer_auth(bearer.expose_secret())
            .send()
            .await
            .map_err(|e| SecretStoreError::Unavailable(format!("vault request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                // Drop the bearer so the next attempt performs a fresh exchange.
                *self.bearer.lock().await = None;
            }
            error!(secret = name, status = status.as_u16(), "[SECRETS] Key Vault refused request");
            return Err(classify_vault_status(status.as_u16(), name, &body));
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| SecretStoreError::Unavailable(format!("malformed secret bundle: {e}")))?;
        Ok(SecretValue {
            expires_at: expiry(bundle.attributes.as_ref()),
            value: AccessToken::new(bundle.value),
        })
    }
}
