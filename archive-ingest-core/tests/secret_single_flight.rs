use archive_ingest_core::contract::{AccessToken, SecretStore, SecretValue};
use archive_ingest_core::error::SecretStoreError;
use archive_ingest_core::secrets::{SecretCacheConfig, SecretProvider};
use secrecy::ExposeSecret;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slow store that counts how often it is asked.
struct SlowVault {
    calls: AtomicUsize,
    fail: bool,
    lifetime: chrono::Duration,
}

impl Default for SlowVault {
    fn default() -> Self {
        Self::lasting(chrono::Duration::hours(1))
    }
}

impl SlowVault {
    fn lasting(lifetime: chrono::Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            lifetime,
        }
    }

    fn refusing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SecretStore for SlowVault {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretStoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail {
            return Err(SecretStoreError::AccessDenied {
                name: name.to_string(),
                message: "policy forbids get".to_string(),
            });
        }
        Ok(SecretValue {
            value: AccessToken::new(format!("sas-{call}")),
            expires_at: Some(Utc::now() + self.lifetime),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_share_one_fetch() {
    let vault = Arc::new(SlowVault::default());
    let provider = Arc::new(SecretProvider::new(Arc::clone(&vault), SecretCacheConfig::default()));

    let lookups = (0..16).map(|_| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.resolve("blob-sas").await })
    });
    let results = futures::future::join_all(lookups).await;

    assert_eq!(vault.calls.load(Ordering::SeqCst), 1);
    for result in results {
        let credential = result.unwrap().unwrap();
        assert_eq!(credential.value.expose_secret(), "sas-1");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_names_fetch_independently() {
    let vault = Arc::new(SlowVault::default());
    let provider = Arc::new(SecretProvider::new(Arc::clone(&vault), SecretCacheConfig::default()));

    let (a, b) = tokio::join!(provider.resolve("one"), provider.resolve("two"));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(vault.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let vault = Arc::new(SlowVault::refusing());
    let provider = SecretProvider::new(Arc::clone(&vault), SecretCacheConfig::default());

    let first = provider.resolve("blob-sas").await.unwrap_err();
    assert!(first.to_string().contains("blob-sas"));
    assert!(provider.resolve("blob-sas").await.is_err());
    assert_eq!(vault.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_a_refusal() {
    let vault = Arc::new(SlowVault::refusing());
    let provider = Arc::new(SecretProvider::new(Arc::clone(&vault), SecretCacheConfig::default()));

    let lookups = (0..16).map(|_| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.resolve("blob-sas").await })
    });
    let results = futures::future::join_all(lookups).await;

    assert_eq!(vault.calls.load(Ordering::SeqCst), 1);
    for result in results {
        let err = result.unwrap().unwrap_err();
        assert!(matches!(err.source, SecretStoreError::AccessDenied { .. }));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_a_short_lived_secret() {
    // Ten seconds is inside the default refresh skew, so each new caller would refetch.
    let vault = Arc::new(SlowVault::lasting(chrono::Duration::seconds(10)));
    let provider = Arc::new(SecretProvider::new(Arc::clone(&vault), SecretCacheConfig::default()));

    let lookups = (0..16).map(|_| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.resolve("blob-sas").await })
    });
    let results = futures::future::join_all(lookups).await;

    assert_eq!(vault.calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap().unwrap().value.expose_secret(), "sas-1");
    }

    // A caller arriving after the fetch finished applies the skew again.
    provider.resolve("blob-sas").await.unwrap();
    assert_eq!(vault.calls.load(Ordering::SeqCst), 2);
}
