//! Batch report: one terminal outcome per discovered item.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use crate::contract::{OutcomeStatus, SkipReason, UploadOutcome};

/// Why a batch stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    AuthFailure { message: String },
    Cancelled,
}

/// Aggregated result of one run.
///
/// Outcomes are stored in the order items reached a terminal state. Each outcome
/// carries its item's discovery `sequence`, so [`BatchReport::in_discovery_order`]
/// can rebuild the original order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub container: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: Option<AbortReason>,
    pub outcomes: Vec<UploadOutcome>,
    #[serde(skip)]
    seen: HashSet<usize>,
}

impl BatchReport {
    pub fn new(container: impl Into<String>, total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            container: container.into(),
            started_at: Utc::now(),
            finished_at: None,
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            aborted: None,
            outcomes: Vec::with_capacity(total),
            seen: HashSet::with_capacity(total),
        }
    }

    /// Appends a terminal outcome. A second outcome for the same item is dropped.
    pub fn record(&mut self, outcome: UploadOutcome) -> bool {
        if !self.seen.insert(outcome.item.sequence) {
            warn!(
                sequence = outcome.item.sequence,
                path = %outcome.item.path.display(),
                "[REPORT] Duplicate outcome ignored"
            );
            return false;
        }
        match outcome.status {
            OutcomeStatus::Succeeded => self.succeeded += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
        true
    }

    pub fn contains(&self, sequence: usize) -> bool {
        self.seen.contains(&sequence)
    }

    /// Keeps the first reason given.
    pub fn abort(&mut self, reason: AbortReason) {
        if self.aborted.is_none() {
            self.aborted = Some(reason);
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// True once every discovered item has an outcome.
    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.total
    }

    pub fn in_discovery_order(&self) -> Vec<&UploadOutcome> {
        let mut ordered: Vec<&UploadOutcome> = self.outcomes.iter().collect();
        ordered.sort_by_key(|o| o.item.sequence);
        ordered
    }

    pub fn skipped_because(&self, reason: SkipReason) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.skip_reason == Some(reason))
            .count()
    }

    /// Compact form for the presentation layer: counts plus path → result.
    pub fn summary(&self) -> ReportSummary {
        let items = self
            .outcomes
            .iter()
            .map(|o| {
                (
                    o.item.path.display().to_string(),
                    ItemSummary {
                        status: o.status,
                        remote_id: o.remote_id.clone(),
                        error: o.error.clone(),
                        skip_reason: o.skip_reason,
                        attempts: o.attempts,
                        page_count: o.page_count,
                    },
                )
            })
            .collect();
        ReportSummary {
            run_id: self.run_id,
            container: self.container.clone(),
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            aborted: self.aborted.clone(),
            items,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub container: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: Option<AbortReason>,
    pub items: BTreeMap<String, ItemSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub status: OutcomeStatus,
    pub remote_id: Option<String>,
    pub error: Option<String>,
    pub skip_reason: Option<SkipReason>,
    pub attempts: u32,
    pub page_count: Option<u32>,
}
