use tracing::{debug, info};

use crate::error::IngestError;
use crate::inspect::InspectorConfig;
use crate::secrets::SecretCacheConfig;
use crate::upload::UploadConfig;

/// Everything the orchestrator needs to run a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Name of the secret holding the storage credential.
    pub secret_name: String,
    /// Ceiling on items in flight at once.
    pub concurrency: usize,
    /// When false, items are inspected but never uploaded.
    pub upload_enabled: bool,
    pub follow_links: bool,
    pub upload: UploadConfig,
    pub inspector: InspectorConfig,
    pub secrets: SecretCacheConfig,
}

impl IngestConfig {
    pub const DEFAULT_CONCURRENCY: usize = 4;

    pub fn new(container: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            concurrency: Self::DEFAULT_CONCURRENCY,
            upload_enabled: true,
            follow_links: false,
            upload: UploadConfig::new(container),
            inspector: InspectorConfig::default(),
            secrets: SecretCacheConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.concurrency == 0 {
            return Err(IngestError::Config("concurrency must be at least 1".into()));
        }
        if self.upload.container.trim().is_empty() {
            return Err(IngestError::Config("container must not be empty".into()));
        }
        if self.upload_enabled && self.secret_name.trim().is_empty() {
            return Err(IngestError::Config("secret name must not be empty".into()));
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            container = %self.upload.container,
            prefix = ?self.upload.prefix,
            concurrency = self.concurrency,
            upload_enabled = self.upload_enabled,
            overwrite = self.upload.overwrite,
            max_attempts = self.upload.retry.max_attempts,
            "Loaded IngestConfig"
        );
        debug!(?self, "IngestConfig loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = IngestConfig::new("masters", "blob-sas");
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 4);
        assert!(!config.upload.overwrite);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = IngestConfig::new("masters", "blob-sas");
        config.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn secret_name_only_required_when_uploading() {
        let mut config = IngestConfig::new("masters", "");
        assert!(config.validate().is_err());
        config.upload_enabled = false;
        assert!(config.validate().is_ok());
    }
}
