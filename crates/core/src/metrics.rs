//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (claims, backend attempts, outcomes, reconciliation)
//! - Artifact collection (stored files, skipped duplicates)
//! - Relay (uploads, bytes)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator
// =============================================================================

/// Claim attempts by result.
pub static CLAIMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("evidence_claims_total", "Total case claim attempts"),
        &["result"], // "claimed", "lost", "error"
    )
    .unwrap()
});

/// Backend attempts by backend and result.
pub static ACQUISITION_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "evidence_acquisition_attempts_total",
            "Total backend acquisition attempts",
        ),
        &["backend", "result"], // "acquired", "start_failed", "failed", "interrupted"
    )
    .unwrap()
});

/// Backend attempt duration in seconds.
pub static ATTEMPT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "evidence_attempt_duration_seconds",
            "Duration of a single backend attempt",
        )
        .buckets(vec![
            10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0,
        ]),
        &["backend"],
    )
    .unwrap()
});

/// Cases finished by outcome.
pub static CASES_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("evidence_cases_finished_total", "Total cases processed"),
        &["outcome"], // "acquired", "not_applicable", "failed", "skipped", "deferred", "interrupted"
    )
    .unwrap()
});

/// Cancels issued to backends.
pub static BACKEND_CANCELS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("evidence_backend_cancels_total", "Total backend job cancels"),
        &["backend"],
    )
    .unwrap()
});

/// Transient poll errors.
pub static POLL_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("evidence_poll_errors_total", "Total transient job poll errors"),
        &["backend"],
    )
    .unwrap()
});

/// Cases reset to eligible by the reconciliation sweep.
pub static RECONCILED_CASES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "evidence_reconciled_cases_total",
        "Total stale cases reset by the reconciliation sweep",
    )
    .unwrap()
});

// =============================================================================
// Collection
// =============================================================================

pub static ARTIFACTS_STORED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("evidence_artifacts_stored_total", "Total artifacts stored").unwrap()
});

pub static DUPLICATES_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "evidence_duplicates_skipped_total",
        "Total files dropped because their content was already stored",
    )
    .unwrap()
});

// =============================================================================
// Relay
// =============================================================================

pub static RELAY_UPLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("evidence_relay_uploads_total", "Total relay file uploads"),
        &["result"], // "success", "failure"
    )
    .unwrap()
});

pub static RELAY_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("evidence_relay_bytes_total", "Total bytes relayed").unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(CLAIMS.clone()),
        Box::new(ACQUISITION_ATTEMPTS.clone()),
        Box::new(ATTEMPT_DURATION.clone()),
        Box::new(CASES_FINISHED.clone()),
        Box::new(BACKEND_CANCELS.clone()),
        Box::new(POLL_ERRORS.clone()),
        Box::new(RECONCILED_CASES.clone()),
        // Collection
        Box::new(ARTIFACTS_STORED.clone()),
        Box::new(DUPLICATES_SKIPPED.clone()),
        // Relay
        Box::new(RELAY_UPLOADS.clone()),
        Box::new(RELAY_BYTES.clone()),
    ]
}
