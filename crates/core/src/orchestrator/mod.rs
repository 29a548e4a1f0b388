//! Acquisition orchestrator.
//!
//! Turns the record store into a work queue: claims eligible cases, runs the
//! backend fallback chain with timeouts, relays the collected files and writes
//! the terminal status back. A periodic sweep repairs cases left in progress
//! by crashed workers.

mod attempt;
mod claim;
mod config;
mod reconcile;
mod runner;
mod throttle;
mod types;

pub use claim::ClaimGuard;
pub use config::OrchestratorConfig;
pub use runner::AcquisitionOrchestrator;
pub use throttle::LaunchThrottle;
pub use types::{
    CaseOutcome, CaseReport, CycleReport, OrchestratorError, OrchestratorStatus, ReconcileReport,
};
