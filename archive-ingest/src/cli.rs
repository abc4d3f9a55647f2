/// # archive-ingest CLI Interface (Module)
///
/// This module implements the CLI for archive-ingest: command parsing, applying flag
/// overrides on top of the YAML config, wiring the Azure clients into the core
/// orchestrator, and presenting the batch report.
///
/// All pipeline logic (discovery, inspection, credentials, retries, concurrency) lives in the
/// [`archive-ingest-core`] crate. This module is strictly glue.
///
/// ## How To Use
/// - For command-line users: `archive-ingest ingest --config ingest.yaml [--source DIR] ...`
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// ## Exit status
/// `run` returns an error when the batch could not start, was aborted (credential loss or
/// interrupt), or finished with failed items. Items skipped as invalid documents do not
/// count as failures.
///
/// [`archive-ingest-core`]: ../../archive_ingest_core/
use crate::blobstore::BlobStoreClient;
use crate::keyvault::KeyVaultClient;
use crate::load_config::{load_config, CliConfig};
use anyhow::{anyhow, bail, Context, Result};
use archive_ingest_core::config::IngestConfig;
use archive_ingest_core::contract::{
    AccessToken, ObjectStore, OutcomeStatus, PutObjectRequest, PutReceipt, SecretStore,
    SecretValue,
};
use archive_ingest_core::error::{ObjectStoreError, SecretStoreError};
use archive_ingest_core::ingest::{ItemEvent, ItemState, Orchestrator};
use archive_ingest_core::report::BatchReport;
use archive_ingest_core::secrets::SecretProvider;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// CLI for archive-ingest: move scanned archive material into cloud object storage.
#[derive(Parser)]
#[clap(
    name = "archive-ingest",
    version,
    about = "Validate scanned archive documents and upload them to Azure Blob Storage"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest one source directory into the configured container
    Ingest {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Source root; overrides `source.root`
        #[clap(long)]
        source: Option<PathBuf>,
        /// Target container; overrides `target.container`
        #[clap(long)]
        container: Option<String>,
        /// Inspect only, never contact the vault or the store
        #[clap(long)]
        no_upload: bool,
        /// Replace blobs that already exist
        #[clap(long)]
        overwrite: bool,
        /// Items in flight at once; overrides `upload.concurrency`
        #[clap(long)]
        concurrency: Option<usize>,
        /// Write the JSON report to this path
        #[clap(long)]
        report: Option<PathBuf>,
    },
}

/// Flag overrides for one `ingest` invocation.
#[derive(Debug, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub container: Option<String>,
    pub no_upload: bool,
    pub overwrite: bool,
    pub concurrency: Option<usize>,
}

impl Overrides {
    pub fn apply(self, config: &mut CliConfig) {
        if let Some(source) = self.source {
            config.source.root = Some(source);
        }
        if let Some(container) = self.container {
            config.target.container = Some(container);
        }
        if self.no_upload {
            config.upload.enabled = false;
        }
        if self.overwrite {
            config.upload.overwrite = true;
        }
        if let Some(concurrency) = self.concurrency {
            config.upload.concurrency = concurrency;
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Ingest {
            config,
            source,
            container,
            no_upload,
            overwrite,
            concurrency,
            report,
        } => {
            let mut config = load_config(&config)?;
            Overrides {
                source,
                container,
                no_upload,
                overwrite,
                concurrency,
            }
            .apply(&mut config);
            tracing::info!(command = "ingest", "Starting ingestion");

            let report_out = ingest(&config).await?;
            print_summary(&report_out);
            if let Some(path) = report {
                write_report(&report_out, &path)?;
            }

            if let Some(reason) = &report_out.aborted {
                tracing::error!(command = "ingest", ?reason, "Ingestion aborted");
                bail!("batch aborted: {reason:?}");
            }
            if report_out.failed > 0 {
                tracing::error!(command = "ingest", failed = report_out.failed, "Ingestion finished with failures");
                bail!("{} item(s) failed to upload", report_out.failed);
            }
            tracing::info!(command = "ingest", run_id = %report_out.run_id, "Ingestion complete");
            Ok(())
        }
    }
}

/// Runs one batch for an already-loaded config, wiring real or offline stores.
pub async fn ingest(config: &CliConfig) -> Result<BatchReport> {
    let root = config
        .source
        .root
        .clone()
        .ok_or_else(|| anyhow!("no source root: set source.root or pass --source"))?;
    let ingest_config = config.ingest_config()?;
    ingest_config.trace_loaded();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling batch");
            on_interrupt.cancel();
        }
    });

    let result = if ingest_config.upload_enabled {
        let account_url = config
            .target
            .account_url
            .as_deref()
            .context("target.account_url is required when uploading")?;
        let vault_url = config
            .secrets
            .vault_url
            .as_deref()
            .context("secrets.vault_url is required when uploading")?;
        let credentials = config.azure.clone().context(
            "AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET must be set when uploading",
        )?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upload.timeout_secs))
            .build()
            .context("building HTTP client")?;
        let vault = KeyVaultClient::new(http.clone(), vault_url, credentials)
            .context("configuring Key Vault client")?;
        let blobs = BlobStoreClient::new(http, account_url)?;
        run_batch(ingest_config, vault, blobs, &root, &cancel).await
    } else {
        run_batch(ingest_config, Offline, Offline, &root, &cancel).await
    };

    interrupt.abort();
    result
}

async fn run_batch<S, O>(
    config: IngestConfig,
    vault: S,
    store: O,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<BatchReport>
where
    S: SecretStore + 'static,
    O: ObjectStore + 'static,
{
    let secrets = Arc::new(SecretProvider::new(Arc::new(vault), config.secrets.clone()));
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let progress = tokio::spawn(print_progress(events_rx));

    let orchestrator = Orchestrator::new(config, Arc::clone(&secrets), Arc::new(store))
        .with_events(events_tx);
    let report = orchestrator.run(root, cancel).await;
    drop(orchestrator);
    secrets.clear();
    let _ = progress.await;

    Ok(report?)
}

async fn print_progress(mut events: tokio::sync::mpsc::UnboundedReceiver<ItemEvent>) {
    while let Some(event) = events.recv().await {
        if let ItemState::Finished(status) = event.state {
            let tag = match status {
                OutcomeStatus::Succeeded => "ok",
                OutcomeStatus::Failed => "FAILED",
                OutcomeStatus::Skipped => "skipped",
            };
            println!("[{tag}] {}", event.path.display());
        }
    }
}

fn print_summary(report: &BatchReport) {
    println!(
        "Ingest report {} for container '{}': total={} succeeded={} failed={} skipped={}",
        report.run_id, report.container, report.total, report.succeeded, report.failed, report.skipped
    );
    for outcome in report.in_discovery_order() {
        if outcome.status == OutcomeStatus::Succeeded {
            continue;
        }
        println!(
            "  {:?} {}: {}",
            outcome.status,
            outcome.item.path.display(),
            outcome.error.as_deref().unwrap_or("-")
        );
    }
}

fn write_report(report: &BatchReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&report.summary()).context("serialising report")?;
    std::fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
    tracing::info!(report_path = ?path, "Report written");
    Ok(())
}

/// Stand-in for both remote stores when uploading is switched off. Never reached by
/// the orchestrator in that mode.
struct Offline;

#[async_trait]
impl SecretStore for Offline {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretStoreError> {
        Err(SecretStoreError::Unavailable(format!(
            "uploading is disabled, secret '{name}' not fetched"
        )))
    }
}

#[async_trait]
impl ObjectStore for Offline {
    async fn put_object(
        &self,
        request: PutObjectRequest,
        _token: &AccessToken,
    ) -> Result<PutReceipt, ObjectStoreError> {
        Err(ObjectStoreError::Malformed {
            status: 0,
            message: format!("uploading is disabled, '{}' not stored", request.key),
        })
    }
}
