//! High-level pipeline: discover → inspect → upload for one source root.
//!
//! [`Orchestrator::run`] drives a whole batch:
//!   - Discovers every file under the root in natural order (see [`crate::discover`]),
//!     on the blocking pool.
//!   - Resolves the storage credential once up front. Without it nothing is attempted,
//!     and every item is reported as skipped for `auth_failure`.
//!   - Starts one task per item, in discovery order, never more than `concurrency` at a
//!     time. Each task inspects its item and, if the item is valid, uploads it.
//!   - Collects each outcome as it arrives. The resulting [`BatchReport`] holds exactly
//!     one outcome per discovered item.
//!
//! # Failure model
//! - Invalid documents and failed uploads are item-level. Sibling items carry on.
//! - A credential that cannot be resolved mid-run stops new items from starting.
//!   Items already in flight finish, and unstarted ones are skipped for `auth_failure`.
//! - Cancelling the token stops new items from starting and interrupts in-flight
//!   uploads. Both become skipped for `cancelled`.
//! - A worker task that panics is reported as a failed item.
//!
//! # Events
//! An optional unbounded channel receives an [`ItemEvent`] for each state change. It
//! lets a caller render progress without waiting for the report.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::contract::{ObjectStore, OutcomeStatus, SecretStore, SkipReason, SourceItem, UploadOutcome};
use crate::discover::Discoverer;
use crate::error::IngestError;
use crate::inspect::Inspector;
use crate::report::{AbortReason, BatchReport};
use crate::secrets::SecretProvider;
use crate::upload::UploadClient;

/// Progress of one item through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Discovered,
    Inspecting,
    Uploading,
    Finished(OutcomeStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemEvent {
    pub sequence: usize,
    pub path: PathBuf,
    pub state: ItemState,
}

pub struct Orchestrator<S, O> {
    config: IngestConfig,
    secrets: Arc<SecretProvider<S>>,
    uploader: Arc<UploadClient<O>>,
    inspector: Inspector,
    events: Option<UnboundedSender<ItemEvent>>,
}

impl<S, O> std::fmt::Debug for Orchestrator<S, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("inspector", &self.inspector)
            .finish()
    }
}

impl<S, O> Orchestrator<S, O>
where
    S: SecretStore + 'static,
    O: ObjectStore + 'static,
{
    /// Builds an orchestrator with the lopdf-backed inspector.
    pub fn new(config: IngestConfig, secrets: Arc<SecretProvider<S>>, store: Arc<O>) -> Self {
        let uploader = Arc::new(UploadClient::new(store, config.upload.clone()));
        let inspector = Inspector::pdf(config.inspector.clone());
        Self {
            config,
            secrets,
            uploader,
            inspector,
            events: None,
        }
    }

    pub fn with_inspector(mut self, inspector: Inspector) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<ItemEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs one batch over `root`.
    ///
    /// Only setup problems are returned as errors. Everything that happens to
    /// individual items, including batch-wide aborts, is in the report.
    pub async fn run(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, IngestError> {
        self.config.validate()?;
        if !root.is_dir() {
            error!(root = %root.display(), "[INGEST][ERROR] Source root is not a directory");
            return Err(IngestError::SourceRoot(root.to_path_buf()));
        }
        info!(
            root = %root.display(),
            container = %self.config.upload.container,
            concurrency = self.config.concurrency,
            "[INGEST] Starting batch"
        );

        // The walk does blocking filesystem calls; keep it off the async workers.
        let discoverer = Discoverer::new(root).follow_links(self.config.follow_links);
        let items: Vec<SourceItem> =
            tokio::task::spawn_blocking(move || discoverer.items().collect::<Vec<_>>())
                .await
                .map_err(|e| {
                    error!(error = %e, "[INGEST][ERROR] Discovery task failed");
                    IngestError::Discovery(e.to_string())
                })?;
        for item in &items {
            emit(&self.events, item, ItemState::Discovered);
        }
        info!(discovered = items.len(), "[INGEST] Discovery complete");

        let mut report = BatchReport::new(self.config.upload.container.clone(), items.len());
        if items.is_empty() {
            return Ok(report.finish());
        }

        if self.config.upload_enabled && !cancel.is_cancelled() {
            if let Err(e) = self.secrets.resolve(&self.config.secret_name).await {
                error!(error = %e, "[INGEST][ERROR] Credential unavailable, nothing will be uploaded");
                let message = e.to_string();
                for item in items {
                    self.record(
                        &mut report,
                        UploadOutcome::skipped(item, SkipReason::AuthFailure, Some(message.clone())),
                    );
                }
                report.abort(AbortReason::AuthFailure { message });
                return Ok(self.finish(report));
            }
        }

        let halt = cancel.child_token();
        let auth_failure: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<UploadOutcome>();
        let worker = Worker {
            secrets: Arc::clone(&self.secrets),
            uploader: Arc::clone(&self.uploader),
            inspector: self.inspector.clone(),
            secret_name: Arc::from(self.config.secret_name.as_str()),
            upload_enabled: self.config.upload_enabled,
            events: self.events.clone(),
            cancel: cancel.clone(),
            halt: halt.clone(),
            auth_failure: Arc::clone(&auth_failure),
        };

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut pending = items.iter().cloned();
        let mut unstarted = Vec::new();

        while let Some(item) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = halt.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                unstarted.push(item);
                unstarted.extend(pending.by_ref());
                break;
            };

            debug!(sequence = item.sequence, path = %item.path.display(), "[INGEST] Scheduling item");
            let worker = worker.clone();
            let tx = outcome_tx.clone();
            tasks.spawn(async move {
                let outcome = worker.process(item).await;
                drop(permit);
                // The receiver only goes away if `run` itself was dropped.
                let _ = tx.send(outcome);
            });

            while let Ok(outcome) = outcome_rx.try_recv() {
                self.record(&mut report, outcome);
            }
        }
        drop(outcome_tx);

        if !unstarted.is_empty() {
            let (reason, message) = match auth_failure.get() {
                Some(message) if !cancel.is_cancelled() => (SkipReason::AuthFailure, message.clone()),
                _ => (SkipReason::Cancelled, "batch cancelled before item started".to_string()),
            };
            warn!(count = unstarted.len(), ?reason, "[INGEST] Items not started");
            for item in unstarted {
                self.record(&mut report, UploadOutcome::skipped(item, reason, Some(message.clone())));
            }
        }

        while let Some(outcome) = outcome_rx.recv().await {
            self.record(&mut report, outcome);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "[INGEST][ERROR] Worker task ended abnormally");
            }
        }
        for item in items {
            if !report.contains(item.sequence) {
                self.record(
                    &mut report,
                    UploadOutcome::failed(item, 0, "worker task ended without an outcome"),
                );
            }
        }

        if cancel.is_cancelled() {
            report.abort(AbortReason::Cancelled);
        } else if let Some(message) = auth_failure.get() {
            report.abort(AbortReason::AuthFailure {
                message: message.clone(),
            });
        }
        Ok(self.finish(report))
    }

    fn record(&self, report: &mut BatchReport, outcome: UploadOutcome) {
        emit(&self.events, &outcome.item, ItemState::Finished(outcome.status));
        report.record(outcome);
    }

    fn finish(&self, report: BatchReport) -> BatchReport {
        let report = report.finish();
        info!(
            run_id = %report.run_id,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            aborted = ?report.aborted,
            "[INGEST] Batch finished"
        );
        report
    }
}

fn emit(events: &Option<UnboundedSender<ItemEvent>>, item: &SourceItem, state: ItemState) {
    if let Some(tx) = events {
        let _ = tx.send(ItemEvent {
            sequence: item.sequence,
            path: item.path.clone(),
            state,
        });
    }
}

/// Everything one item task needs, shared between tasks.
struct Worker<S, O> {
    secrets: Arc<SecretProvider<S>>,
    uploader: Arc<UploadClient<O>>,
    inspector: Inspector,
    secret_name: Arc<str>,
    upload_enabled: bool,
    events: Option<UnboundedSender<ItemEvent>>,
    cancel: CancellationToken,
    halt: CancellationToken,
    auth_failure: Arc<OnceLock<String>>,
}

impl<S, O> Clone for Worker<S, O> {
    fn clone(&self) -> Self {
        Self {
            secrets: Arc::clone(&self.secrets),
            uploader: Arc::clone(&self.uploader),
            inspector: self.inspector.clone(),
            secret_name: Arc::clone(&self.secret_name),
            upload_enabled: self.upload_enabled,
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            halt: self.halt.clone(),
            auth_failure: Arc::clone(&self.auth_failure),
        }
    }
}

impl<S: SecretStore, O: ObjectStore> Worker<S, O> {
    async fn process(&self, item: SourceItem) -> UploadOutcome {
        emit(&self.events, &item, ItemState::Inspecting);
        let inspection = self.inspector.inspect(&item).await;
        if !inspection.valid {
            let message = inspection.error.as_ref().map(|e| e.to_string());
            return UploadOutcome::skipped(item, SkipReason::InvalidDocument, message);
        }
        if self.cancel.is_cancelled() {
            return UploadOutcome::skipped(
                item,
                SkipReason::Cancelled,
                Some("batch cancelled before upload".to_string()),
            )
            .with_page_count(inspection.page_count);
        }
        if !self.upload_enabled {
            return UploadOutcome::skipped(item, SkipReason::UploadDisabled, None)
                .with_page_count(inspection.page_count);
        }
        if let Some(message) = self.auth_failure.get() {
            return UploadOutcome::skipped(item, SkipReason::AuthFailure, Some(message.clone()))
                .with_page_count(inspection.page_count);
        }

        emit(&self.events, &item, ItemState::Uploading);
        match self
            .uploader
            .upload(&inspection, &self.secrets, &self.secret_name, &self.cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(path = %item.path.display(), error = %e, "[INGEST][ERROR] Credential lost, halting batch");
                let message = self.auth_failure.get_or_init(|| e.to_string()).clone();
                self.halt.cancel();
                UploadOutcome::skipped(item, SkipReason::AuthFailure, Some(message))
                    .with_page_count(inspection.page_count)
            }
        }
    }
}
