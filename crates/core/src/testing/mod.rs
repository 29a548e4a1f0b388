//! Testing utilities and mock implementations for integration tests.
//!
//! This module provides mock implementations of the external collaborator
//! traits, so the orchestrator can be driven end to end without a real record
//! store, backend service or relay.
//!
//! # Example
//!
//! ```rust,ignore
//! use evidence_core::testing::{fixtures, MockBackend, MockRecordStore, MockRelay};
//!
//! let store = MockRecordStore::new();
//! store.insert(fixtures::case("c1", "Jane Doe")).await;
//!
//! let backend = MockBackend::new("remote_agent");
//! let relay = MockRelay::new();
//! // Build an AcquisitionOrchestrator around them and call run_cycle()...
//! ```

mod mock_backend;
mod mock_record_store;
mod mock_relay;

pub use mock_backend::{MockBackend, MockBehavior};
pub use mock_record_store::{MockRecordStore, StoreOp};
pub use mock_relay::{MockRelay, RecordedUpload};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::orchestrator::OrchestratorConfig;
    use crate::record_store::{Case, CaseStatus};

    /// An eligible case with a portal target derived from its id.
    pub fn case(id: &str, display_name: &str) -> Case {
        Case::new(id, display_name, format!("https://portal.example/cases/{}", id))
    }

    /// An in-progress case holding a job reference.
    pub fn acquiring_case(id: &str, display_name: &str, owner: &str, job_ref: &str) -> Case {
        let mut case = case(id, display_name).with_status(CaseStatus::Acquiring);
        case.lock_owner = Some(owner.to_string());
        case.active_job_ref = Some(job_ref.to_string());
        case
    }

    /// Orchestrator settings scaled down to milliseconds for tests.
    pub fn fast_orchestrator_config() -> OrchestratorConfig {
        OrchestratorConfig {
            scheduler_poll_interval_ms: 20,
            fetch_limit: 10,
            max_concurrent: 2,
            min_launch_interval_ms: 0,
            job_poll_interval_ms: 5,
            attempt_timeout_ms: 5_000,
            inactivity_timeout_ms: 2_000,
            max_poll_errors: 3,
            max_poll_backoff_ms: 20,
            reconcile_interval_ms: 50,
            stale_claim_ms: 60_000,
            shutdown_grace_ms: 1_000,
        }
    }
}
