//! Types for the acquisition orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during orchestration.
///
/// None of these escape a single case's processing; they end up as the
/// case's failure reason.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("record store error: {0}")]
    RecordStore(#[from] crate::record_store::RecordStoreError),

    #[error("backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),

    #[error("collector error: {0}")]
    Collector(#[from] crate::collector::CollectorError),

    #[error("relay error: {0}")]
    Relay(#[from] crate::relay::RelayError),

    #[error("no acquisition backends configured")]
    NoBackends,
}

/// How processing one case ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaseOutcome {
    /// Files acquired and relayed.
    Acquired {
        backend: String,
        artifacts: usize,
        reference: String,
    },
    /// The pre-filter decided there is nothing to fetch.
    NotApplicable { reason: String },
    /// Every backend failed, or the relay did.
    Failed { reason: String },
    /// The claim was lost to another worker or could not be written.
    Skipped,
    /// Claimed, then handed back because the concurrency ceiling was reached.
    Deferred,
    /// Shutdown arrived mid-attempt; the case went back to eligible.
    Interrupted,
}

impl CaseOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            CaseOutcome::Acquired { .. } => "acquired",
            CaseOutcome::NotApplicable { .. } => "not_applicable",
            CaseOutcome::Failed { .. } => "failed",
            CaseOutcome::Skipped => "skipped",
            CaseOutcome::Deferred => "deferred",
            CaseOutcome::Interrupted => "interrupted",
        }
    }
}

/// Result of one case within a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub case_id: String,
    #[serde(flatten)]
    pub outcome: CaseOutcome,
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    /// Eligible cases returned by the store.
    pub fetched: usize,
    /// Whether the cycle stopped because the ceiling was reached.
    pub at_ceiling: bool,
    pub cases: Vec<CaseReport>,
}

/// Result of one reconciliation sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// In-progress cases looked at.
    pub examined: usize,
    /// Cases reset to eligible.
    pub reset: Vec<String>,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the loops are running.
    pub running: bool,
    pub worker_id: String,
    /// Case this worker is processing right now.
    pub current_case: Option<String>,
    pub eligible_count: usize,
    pub in_progress_count: usize,
    pub acquired_count: usize,
    pub failed_count: usize,
    /// In-progress cases backed by a live job, across all workers.
    pub live_jobs: usize,
    pub max_concurrent: usize,
}
