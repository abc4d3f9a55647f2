use archive_ingest::cli::Overrides;
use archive_ingest::load_config::load_config;
use secrecy::ExposeSecret;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn clear_azure_env() {
    for key in [
        "AZURE_TENANT_ID",
        "AZURE_CLIENT_ID",
        "AZURE_CLIENT_SECRET",
        "AZURE_BLOBSTORE_VAULTKEY",
    ] {
        env::remove_var(key);
    }
}

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

/// A complete static config maps onto the core config field by field.
#[tokio::test]
#[serial]
async fn test_load_config_full_file() {
    clear_azure_env();
    let file = config_file(
        r#"
source:
  root: ./scans/2024
  follow_links: true
target:
  account_url: https://acct.blob.core.windows.net
  container: masters
  prefix: batch-07
secrets:
  vault_url: https://archive-kv.vault.azure.net
  secret_name: blob-sas
  default_ttl_secs: 600
  refresh_skew_secs: 10
upload:
  overwrite: true
  concurrency: 8
  max_attempts: 6
  base_delay_ms: 100
  max_delay_ms: 1000
inspect:
  document_extensions: [pdf]
  passthrough_extensions: [tif]
"#,
    );

    let config = load_config(file.path()).expect("Config should load");
    assert_eq!(config.source.root, Some(PathBuf::from("./scans/2024")));
    assert!(config.azure.is_none());

    let ingest = config.ingest_config().expect("valid ingest config");
    assert_eq!(ingest.upload.container, "masters");
    assert_eq!(ingest.upload.prefix.as_deref(), Some("batch-07"));
    assert!(ingest.upload.overwrite);
    assert!(ingest.follow_links);
    assert_eq!(ingest.concurrency, 8);
    assert_eq!(ingest.secret_name, "blob-sas");
    assert_eq!(ingest.upload.retry.max_attempts, 6);
    assert_eq!(ingest.upload.retry.base_delay, Duration::from_millis(100));
    assert_eq!(ingest.secrets.default_ttl, Duration::from_secs(600));
    assert_eq!(ingest.inspector.passthrough_extensions, vec!["tif".to_string()]);
}

/// Service principal and secret name come from the environment.
#[tokio::test]
#[serial]
async fn test_load_config_injects_environment() {
    clear_azure_env();
    env::set_var("AZURE_TENANT_ID", "tenant");
    env::set_var("AZURE_CLIENT_ID", "client");
    env::set_var("AZURE_CLIENT_SECRET", "s3cret");
    env::set_var("AZURE_BLOBSTORE_VAULTKEY", "sas-from-env");
    let file = config_file("target:\n  container: masters\nsecrets:\n  secret_name: from-file\n");

    let config = load_config(file.path()).expect("Config should load");
    clear_azure_env();

    let azure = config.azure.as_ref().expect("credentials injected");
    assert_eq!(azure.tenant_id, "tenant");
    assert!(!format!("{azure:?}").contains("s3cret"));
    assert_eq!(azure.client_secret.expose_secret(), "s3cret");
    assert_eq!(config.secrets.secret_name.as_deref(), Some("sas-from-env"));
}

/// A partial service principal is treated as absent.
#[tokio::test]
#[serial]
async fn test_load_config_incomplete_principal() {
    clear_azure_env();
    env::set_var("AZURE_TENANT_ID", "tenant");
    let file = config_file("target:\n  container: masters\n");

    let config = load_config(file.path()).expect("Config should load");
    clear_azure_env();
    assert!(config.azure.is_none());
}

/// Minimal files get defaults; flags override the file.
#[tokio::test]
#[serial]
async fn test_defaults_and_overrides() {
    clear_azure_env();
    let file = config_file("target:\n  container: from-file\n");
    let mut config = load_config(file.path()).expect("Config should load");
    assert!(config.upload.enabled);
    assert_eq!(config.upload.concurrency, 4);

    Overrides {
        source: Some(PathBuf::from("/mnt/scans")),
        container: Some("from-flag".into()),
        no_upload: true,
        overwrite: true,
        concurrency: Some(1),
    }
    .apply(&mut config);

    let ingest = config.ingest_config().expect("no secret needed without upload");
    assert_eq!(config.source.root, Some(PathBuf::from("/mnt/scans")));
    assert_eq!(ingest.upload.container, "from-flag");
    assert!(!ingest.upload_enabled);
    assert!(ingest.upload.overwrite);
    assert_eq!(ingest.concurrency, 1);
}

#[tokio::test]
#[serial]
async fn test_missing_container_is_reported() {
    clear_azure_env();
    let file = config_file("");
    let config = load_config(file.path()).expect("empty file loads");
    let err = config.ingest_config().unwrap_err();
    assert!(err.to_string().contains("container"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_zero_concurrency_is_rejected() {
    clear_azure_env();
    let file = config_file("target:\n  container: masters\nupload:\n  enabled: false\n  concurrency: 0\n");
    let config = load_config(file.path()).unwrap();
    assert!(config.ingest_config().is_err());
}

/// This test ensures that if the config file is not valid YAML, load_config errors and reports as such.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    let file = config_file("not-yaml: [:::");
    let msg = load_config(file.path()).unwrap_err().to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_unknown_sections() {
    let file = config_file("download:\n  output_dir: ./tmp\n");
    assert!(load_config(file.path()).is_err());
}

#[tokio::test]
async fn test_load_config_errors_for_missing_file() {
    let msg = load_config("/definitely/not/here.yaml").unwrap_err().to_string();
    assert!(msg.contains("Failed to read config file"), "got: {msg}");
}
