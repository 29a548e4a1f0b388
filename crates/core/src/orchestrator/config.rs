//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the acquisition orchestrator.
///
/// All durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Pause between scheduler cycles.
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_poll_interval_ms: u64,

    /// Eligible cases fetched per cycle.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Global ceiling on cases with a live backend job, across all workers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum time between two case launches by this worker.
    #[serde(default = "default_min_launch_interval")]
    pub min_launch_interval_ms: u64,

    /// Interval between polls of a running backend job.
    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_ms: u64,

    /// Absolute ceiling per backend attempt, measured from job start.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,

    /// Ceiling measured from the last observed job activity.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_ms: u64,

    /// Consecutive transient poll errors before the job is given up.
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,

    /// Cap for the poll backoff after transient errors.
    #[serde(default = "default_max_poll_backoff")]
    pub max_poll_backoff_ms: u64,

    /// Pause between reconciliation sweeps.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_ms: u64,

    /// In-progress cases without a job reference are stale after this long
    /// without an edit.
    #[serde(default = "default_stale_claim")]
    pub stale_claim_ms: u64,

    /// How long `stop()` waits for the loops to finish.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_scheduler_interval() -> u64 {
    60_000 // 1 minute
}

fn default_fetch_limit() -> usize {
    4
}

fn default_max_concurrent() -> usize {
    2
}

fn default_min_launch_interval() -> u64 {
    5_000 // 5 seconds
}

fn default_job_poll_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_attempt_timeout() -> u64 {
    4 * 60 * 60 * 1000 // 4 hours
}

fn default_inactivity_timeout() -> u64 {
    60 * 60 * 1000 // 1 hour
}

fn default_max_poll_errors() -> u32 {
    5
}

fn default_max_poll_backoff() -> u64 {
    5 * 60 * 1000 // 5 minutes
}

fn default_reconcile_interval() -> u64 {
    10 * 60 * 1000 // 10 minutes
}

fn default_stale_claim() -> u64 {
    30 * 60 * 1000 // 30 minutes
}

fn default_shutdown_grace() -> u64 {
    10_000 // 10 seconds
}

impl OrchestratorConfig {
    /// How often a held claim is refreshed: a quarter of the stale window.
    pub fn claim_heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis((self.stale_claim_ms / 4).max(1))
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scheduler_poll_interval_ms: default_scheduler_interval(),
            fetch_limit: default_fetch_limit(),
            max_concurrent: default_max_concurrent(),
            min_launch_interval_ms: default_min_launch_interval(),
            job_poll_interval_ms: default_job_poll_interval(),
            attempt_timeout_ms: default_attempt_timeout(),
            inactivity_timeout_ms: default_inactivity_timeout(),
            max_poll_errors: default_max_poll_errors(),
            max_poll_backoff_ms: default_max_poll_backoff(),
            reconcile_interval_ms: default_reconcile_interval(),
            stale_claim_ms: default_stale_claim(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}
