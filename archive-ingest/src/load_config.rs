/// `load_config` module: Loads a static YAML config, injects secrets and overrides from the
/// environment, and maps the result onto the core [`IngestConfig`].
///
/// This module is the only place where untrusted YAML is parsed and mapped to strongly-typed
/// internal structs.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file (sections `source`, `target`, `secrets`, `upload`, `inspect`)
/// - Inject Azure service-principal credentials (`AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
///   `AZURE_CLIENT_SECRET`) and the secret-name override (`AZURE_BLOBSTORE_VAULTKEY`)
/// - Fill in defaults for every optional key, so a minimal file only needs a container
/// - Produce clear diagnostics: every failure names the file and what went wrong
///
/// # Errors
/// All errors in this module use `anyhow::Error` and are surfaced at the CLI boundary.
///
/// Secrets never live in the YAML file.
use anyhow::{anyhow, Result};
use archive_ingest_core::config::IngestConfig;
use archive_ingest_core::inspect::{InspectorConfig, DEFAULT_PASSTHROUGH_EXTENSIONS};
use archive_ingest_core::retry::RetryPolicy;
use archive_ingest_core::secrets::SecretCacheConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const ENV_VAULT_KEY: &str = "AZURE_BLOBSTORE_VAULTKEY";

#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub source: SourceSection,
    pub target: TargetSection,
    pub secrets: SecretsSection,
    pub upload: UploadSection,
    pub inspect: InspectSection,
    /// Present only when all three service-principal variables are set.
    pub azure: Option<AzureCredentials>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub root: Option<PathBuf>,
    pub follow_links: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetSection {
    /// e.g. `https://<account>.blob.core.windows.net`
    pub account_url: Option<String>,
    pub container: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecretsSection {
    /// e.g. `https://<vault>.vault.azure.net`
    pub vault_url: Option<String>,
    pub secret_name: Option<String>,
    pub default_ttl_secs: u64,
    pub refresh_skew_secs: u64,
}

impl Default for SecretsSection {
    fn default() -> Self {
        let cache = SecretCacheConfig::default();
        Self {
            vault_url: None,
            secret_name: None,
            default_ttl_secs: cache.default_ttl.as_secs(),
            refresh_skew_secs: cache.refresh_skew.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub enabled: bool,
    pub overwrite: bool,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-request timeout for the storage client.
    pub timeout_secs: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            enabled: true,
            overwrite: false,
            concurrency: IngestConfig::DEFAULT_CONCURRENCY,
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InspectSection {
    pub document_extensions: Vec<String>,
    pub passthrough_extensions: Vec<String>,
}

impl Default for InspectSection {
    fn default() -> Self {
        let defaults = InspectorConfig::default();
        Self {
            document_extensions: defaults.document_extensions,
            passthrough_extensions: DEFAULT_PASSTHROUGH_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Service principal used to obtain Key Vault bearer tokens.
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

impl AzureCredentials {
    /// Reads the three service-principal variables. `None` unless all are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let read = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        match (read(ENV_TENANT_ID), read(ENV_CLIENT_ID), read(ENV_CLIENT_SECRET)) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(Self {
                tenant_id,
                client_id,
                client_secret: SecretString::new(client_secret.into_boxed_str()),
            }),
            (tenant, client, secret) => {
                if tenant.is_some() || client.is_some() || secret.is_some() {
                    warn!(
                        tenant_set = tenant.is_some(),
                        client_set = client.is_some(),
                        secret_set = secret.is_some(),
                        "Incomplete Azure service principal in environment"
                    );
                }
                None
            }
        }
    }
}

impl CliConfig {
    /// Maps the file (plus overrides already applied to `self`) onto the core config.
    pub fn ingest_config(&self) -> Result<IngestConfig> {
        let container = self
            .target
            .container
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("target.container is required (or pass --container)"))?;
        let secret_name = self.secrets.secret_name.clone().unwrap_or_default();

        let mut config = IngestConfig::new(container, secret_name);
        config.concurrency = self.upload.concurrency;
        config.upload_enabled = self.upload.enabled;
        config.follow_links = self.source.follow_links;
        config.upload.prefix = self.target.prefix.clone();
        config.upload.overwrite = self.upload.overwrite;
        config.upload.retry = RetryPolicy {
            max_attempts: self.upload.max_attempts,
            base_delay: Duration::from_millis(self.upload.base_delay_ms),
            max_delay: Duration::from_millis(self.upload.max_delay_ms),
            ..RetryPolicy::default()
        };
        config.inspector = InspectorConfig {
            document_extensions: self.inspect.document_extensions.clone(),
            passthrough_extensions: self.inspect.passthrough_extensions.clone(),
        };
        config.secrets = SecretCacheConfig {
            default_ttl: Duration::from_secs(self.secrets.default_ttl_secs),
            refresh_skew: Duration::from_secs(self.secrets.refresh_skew_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Loads a static YAML config file (no secrets) and injects required env vars for secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct RawConfig {
        source: SourceSection,
        target: TargetSection,
        secrets: SecretsSection,
        upload: UploadSection,
        inspect: InspectSection,
    }

    // An empty file deserialises to unit, not to an empty mapping.
    let raw: RawConfig = if config_content.trim().is_empty() {
        RawConfig::default()
    } else {
        match serde_yaml::from_str(&config_content) {
            Ok(conf) => {
                info!(config_path = ?path_ref, "Parsed config YAML successfully");
                conf
            }
            Err(e) => {
                error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                return Err(anyhow!("Failed to parse config YAML: {e}"));
            }
        }
    };

    let mut secrets = raw.secrets;
    if let Some(name) = env::var(ENV_VAULT_KEY).ok().filter(|v| !v.trim().is_empty()) {
        info!(env = ENV_VAULT_KEY, "Secret name taken from environment");
        secrets.secret_name = Some(name);
    }
    let azure = AzureCredentials::from_env();
    info!(azure_credentials = azure.is_some(), "Environment injection complete");

    Ok(CliConfig {
        source: raw.source,
        target: raw.target,
        secrets,
        upload: raw.upload,
        inspect: raw.inspect,
        azure,
    })
}
