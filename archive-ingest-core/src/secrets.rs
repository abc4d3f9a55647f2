//! # secrets: cached, single-flight credential resolution
//!
//! [`SecretProvider`] sits between the pipeline and a remote [`SecretStore`]. It is an
//! explicitly owned object: build one per run (or per process), hand it to the
//! orchestrator, and call [`SecretProvider::clear`] when done.
//!
//! Each secret name gets its own async slot. Resolving a name locks that slot, so
//! concurrent callers asking for the same unresolved name queue behind one fetch and
//! then take its outcome, a refusal as much as a fresh credential. Different names
//! never block each other.
//!
//! A cached credential is reused until it comes within `refresh_skew` of its expiry;
//! after that the next caller refetches it. Secrets the store returns without an
//! expiry are given `default_ttl`.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::contract::{Credential, SecretStore};
use crate::error::AuthError;

/// Cache tuning for [`SecretProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretCacheConfig {
    /// Lifetime given to secrets that carry no expiry of their own.
    pub default_ttl: Duration,
    /// Treat a credential as expired this long before its actual expiry.
    pub refresh_skew: Duration,
}

impl Default for SecretCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(15 * 60),
            refresh_skew: Duration::from_secs(30),
        }
    }
}

/// Per-name cache entry.
///
/// `generation` is bumped (under the lock) every time a fetch finishes. A caller that
/// reads the generation before queueing and finds it changed once it holds the lock
/// takes the outcome of that fetch instead of issuing another one.
#[derive(Default)]
struct Slot {
    generation: AtomicU64,
    state: tokio::sync::Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    credential: Option<Credential>,
    last_error: Option<AuthError>,
}

pub struct SecretProvider<S> {
    store: Arc<S>,
    config: SecretCacheConfig,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl<S> std::fmt::Debug for SecretProvider<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.slots.lock().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("SecretProvider")
            .field("config", &self.config)
            .field("cached_names", &names)
            .finish()
    }
}

impl<S: SecretStore> SecretProvider<S> {
    pub fn new(store: Arc<S>, config: SecretCacheConfig) -> Self {
        Self {
            store,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn to_chrono(d: Duration) -> chrono::Duration {
        chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
    }

    /// Returns a valid credential for `name`, fetching it at most once per expiry.
    ///
    /// Callers that queued behind an in-flight fetch share its result, error included.
    pub async fn resolve(&self, name: &str) -> Result<Credential, AuthError> {
        let slot = self.slot(name);
        let observed = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;
        let now = Utc::now();

        if slot.generation.load(Ordering::Acquire) != observed {
            if let Some(e) = state.last_error.as_ref() {
                debug!(secret = name, "[SECRETS] Sharing failed fetch");
                return Err(e.clone());
            }
            if let Some(credential) = state.credential.as_ref() {
                if !credential.is_expired(now, chrono::Duration::zero()) {
                    debug!(secret = name, "[SECRETS] Sharing fresh fetch");
                    return Ok(credential.clone());
                }
            }
        }

        let skew = Self::to_chrono(self.config.refresh_skew);
        if let Some(credential) = state.credential.as_ref() {
            if !credential.is_expired(now, skew) {
                debug!(secret = name, "[SECRETS] Cache hit");
                return Ok(credential.clone());
            }
            info!(secret = name, expired_at = %credential.expires_at, "[SECRETS] Cached credential expired, refreshing");
        }

        let result = match self.store.get_secret(name).await {
            Ok(fetched) => {
                let expires_at = fetched
                    .expires_at
                    .unwrap_or_else(|| Utc::now() + Self::to_chrono(self.config.default_ttl));
                info!(secret = name, %expires_at, "[SECRETS] Credential fetched");
                Ok(Credential {
                    name: name.to_string(),
                    value: fetched.value,
                    expires_at,
                })
            }
            Err(e) => {
                error!(secret = name, error = %e, "[SECRETS] Secret store refused credential");
                Err(AuthError {
                    name: name.to_string(),
                    source: e,
                })
            }
        };

        match &result {
            Ok(credential) => {
                state.credential = Some(credential.clone());
                state.last_error = None;
            }
            Err(e) => {
                state.credential = None;
                state.last_error = Some(e.clone());
            }
        }
        slot.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Drops the cached credential for `name`; the next resolve refetches it.
    pub async fn invalidate(&self, name: &str) {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.get(name).cloned()
        };
        if let Some(slot) = slot {
            let mut state = slot.state.lock().await;
            state.credential = None;
            state.last_error = None;
            debug!(secret = name, "[SECRETS] Invalidated");
        }
    }

    /// Forgets every cached credential.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = slots.len();
        slots.clear();
        debug!(count, "[SECRETS] Cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{AccessToken, MockSecretStore, SecretValue};
    use crate::error::SecretStoreError;
    use secrecy::ExposeSecret;

    fn value(v: &str, expires_in: Option<i64>) -> SecretValue {
        SecretValue {
            value: AccessToken::new(v),
            expires_at: expires_in.map(|s| Utc::now() + chrono::Duration::seconds(s)),
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_remote_call() {
        let mut store = MockSecretStore::new();
        store
            .expect_get_secret()
            .times(1)
            .returning(|_| Ok(value("sas-1", Some(3600))));
        let provider = SecretProvider::new(Arc::new(store), SecretCacheConfig::default());

        let first = provider.resolve("blob").await.unwrap();
        let second = provider.resolve("blob").await.unwrap();
        assert_eq!(first.value.expose_secret(), second.value.expose_secret());
        assert_eq!(second.name, "blob");
    }

    #[tokio::test]
    async fn expired_credential_is_refetched() {
        let mut store = MockSecretStore::new();
        store
            .expect_get_secret()
            .times(2)
            .returning(|_| Ok(value("short-lived", Some(10))));
        // 10s lifetime is inside the 30s skew, so it is stale immediately.
        let provider = SecretProvider::new(Arc::new(store), SecretCacheConfig::default());

        provider.resolve("blob").await.unwrap();
        provider.resolve("blob").await.unwrap();
    }

    #[tokio::test]
    async fn missing_expiry_gets_default_ttl() {
        let mut store = MockSecretStore::new();
        store
            .expect_get_secret()
            .times(1)
            .returning(|_| Ok(value("forever", None)));
        let provider = SecretProvider::new(Arc::new(store), SecretCacheConfig::default());

        let cred = provider.resolve("blob").await.unwrap();
        assert!(cred.expires_at > Utc::now() + chrono::Duration::minutes(14));
        provider.resolve("blob").await.unwrap();
    }

    #[tokio::test]
    async fn store_errors_become_auth_errors() {
        let mut store = MockSecretStore::new();
        store
            .expect_get_secret()
            .returning(|name| Err(SecretStoreError::NotFound(name.to_string())));
        let provider = SecretProvider::new(Arc::new(store), SecretCacheConfig::default());

        let err = provider.resolve("missing").await.unwrap_err();
        assert_eq!(err.name, "missing");
        assert_eq!(err.source, SecretStoreError::NotFound("missing".into()));
    }

    #[tokio::test]
    async fn invalidate_and_clear_force_refetch() {
        let mut store = MockSecretStore::new();
        store
            .expect_get_secret()
            .times(3)
            .returning(|_| Ok(value("sas", Some(3600))));
        let provider = SecretProvider::new(Arc::new(store), SecretCacheConfig::default());

        provider.resolve("blob").await.unwrap();
        provider.invalidate("blob").await;
        provider.resolve("blob").await.unwrap();
        provider.clear();
        provider.resolve("blob").await.unwrap();
    }
}
