//! Orchestrator lifecycle integration tests.
//!
//! These tests drive whole cases through the orchestrator with in-memory
//! collaborators:
//! eligible -> claimed -> acquiring -> acquired | not applicable | failed

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use evidence_core::{
    testing::{fixtures, MockBackend, MockBehavior, MockRecordStore, MockRelay, StoreOp},
    AcquisitionBackend, AcquisitionOrchestrator, ArtifactCollector, Case, CaseOutcome, CaseStatus,
    CollectorConfig, Liveness, OrchestratorConfig, OrchestratorError, RecordStore,
    RecordStoreError, RelaySink, StartRequest, TextServices,
};

/// Test helper owning the shared store, relay and evidence root.
struct TestHarness {
    store: MockRecordStore,
    relay: MockRelay,
    root: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            store: MockRecordStore::new(),
            relay: MockRelay::new(),
            root: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    fn orchestrator(&self, backends: &[MockBackend]) -> AcquisitionOrchestrator {
        self.orchestrator_with("w1", fixtures::fast_orchestrator_config(), backends)
    }

    fn orchestrator_with(
        &self,
        worker_id: &str,
        config: OrchestratorConfig,
        backends: &[MockBackend],
    ) -> AcquisitionOrchestrator {
        let store = Arc::new(self.store.clone()) as Arc<dyn RecordStore>;
        self.orchestrator_on(store, worker_id, config, backends)
    }

    fn orchestrator_on(
        &self,
        store: Arc<dyn RecordStore>,
        worker_id: &str,
        config: OrchestratorConfig,
        backends: &[MockBackend],
    ) -> AcquisitionOrchestrator {
        let backends = backends
            .iter()
            .map(|b| Arc::new(b.clone()) as Arc<dyn AcquisitionBackend>)
            .collect();
        let collector = ArtifactCollector::new(CollectorConfig {
            destination_root: self.root.path().to_path_buf(),
            ..Default::default()
        });

        AcquisitionOrchestrator::new(
            config,
            worker_id,
            store,
            backends,
            collector,
            Arc::new(self.relay.clone()) as Arc<dyn RelaySink>,
            false,
            TextServices::rules(),
        )
        .expect("Failed to create orchestrator")
    }

    async fn add_case(&self, id: &str, name: &str) {
        self.store.insert(fixtures::case(id, name)).await;
    }

    async fn status(&self, case_id: &str) -> CaseStatus {
        self.store.case(case_id).await.expect("case exists").status
    }

    async fn failure_reason(&self, case_id: &str) -> String {
        self.store
            .case(case_id)
            .await
            .and_then(|c| c.failure_reason)
            .unwrap_or_default()
    }

    /// Assert the case ended with no lock and no job reference, released once.
    async fn assert_released(&self, case_id: &str) {
        let case = self.store.case(case_id).await.expect("case exists");
        assert!(case.lock_owner.is_none(), "lock still held on {}", case_id);
        assert!(case.active_job_ref.is_none(), "job ref left on {}", case_id);
        assert_eq!(self.store.release_count(case_id).await, 1);
    }

    async fn wait_for<F, Fut>(&self, timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Store where another worker finishes `case_id` right after the in-progress
/// listing is taken.
struct FinishedAfterListing {
    inner: MockRecordStore,
    case_id: String,
}

#[async_trait]
impl RecordStore for FinishedAfterListing {
    fn name(&self) -> &str {
        "finished-after-listing"
    }

    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<Case>, RecordStoreError> {
        self.inner.fetch_eligible(limit).await
    }

    async fn get(&self, case_id: &str) -> Result<Case, RecordStoreError> {
        self.inner.get(case_id).await
    }

    async fn try_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError> {
        self.inner.try_claim(case_id, worker_id).await
    }

    async fn touch_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError> {
        self.inner.touch_claim(case_id, worker_id).await
    }

    async fn release(&self, case_id: &str) {
        self.inner.release(case_id).await
    }

    async fn set_status(&self, case_id: &str, status: CaseStatus) -> Result<(), RecordStoreError> {
        self.inner.set_status(case_id, status).await
    }

    async fn set_active_job(
        &self,
        case_id: &str,
        job_ref: Option<&str>,
    ) -> Result<(), RecordStoreError> {
        self.inner.set_active_job(case_id, job_ref).await
    }

    async fn set_failure_reason(
        &self,
        case_id: &str,
        reason: &str,
    ) -> Result<(), RecordStoreError> {
        self.inner.set_failure_reason(case_id, reason).await
    }

    async fn set_upload_reference(
        &self,
        case_id: &str,
        reference: &str,
    ) -> Result<(), RecordStoreError> {
        self.inner.set_upload_reference(case_id, reference).await
    }

    async fn count_by_status(&self, status: CaseStatus) -> Result<usize, RecordStoreError> {
        self.inner.count_by_status(status).await
    }

    async fn list_in_progress(&self) -> Result<Vec<Case>, RecordStoreError> {
        let listed = self.inner.list_in_progress().await?;
        self.inner
            .update(&self.case_id, |case| {
                case.status = CaseStatus::Acquired;
                case.lock_owner = None;
                case.active_job_ref = None;
                case.upload_reference = Some("https://share.example/evidence/done".to_string());
            })
            .await;
        Ok(listed)
    }
}

fn only_outcome(report: &evidence_core::CycleReport) -> &CaseOutcome {
    assert_eq!(report.cases.len(), 1, "expected one processed case");
    &report.cases[0].outcome
}

// =============================================================================
// Happy path and fallback
// =============================================================================

#[tokio::test]
async fn test_first_backend_acquires_case() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    let agent = MockBackend::new("remote_agent");
    let orchestrator = harness.orchestrator(&[agent.clone()]);

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.fetched, 1);
    assert_eq!(
        only_outcome(&report),
        &CaseOutcome::Acquired {
            backend: "remote_agent".to_string(),
            artifacts: 1,
            reference: "https://share.example/evidence/Jane%20Doe%20(c1)".to_string(),
        }
    );

    let case = harness.store.case("c1").await.unwrap();
    assert_eq!(case.status, CaseStatus::Acquired);
    assert_eq!(
        case.upload_reference.as_deref(),
        Some("https://share.example/evidence/Jane%20Doe%20(c1)")
    );
    assert_eq!(
        harness.store.status_history("c1").await,
        vec![
            CaseStatus::Eligible,
            CaseStatus::Claimed,
            CaseStatus::Acquiring,
            CaseStatus::Acquired
        ]
    );
    harness.assert_released("c1").await;

    let uploads = harness.relay.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].remote_path, "/evidence/Jane Doe (c1)/evidence.pdf");
    assert!(harness.root.path().join("Jane Doe (c1)/evidence.pdf").exists());

    let starts = agent.starts().await;
    assert_eq!(starts[0].case_name, "Jane Doe (c1)");
    assert_eq!(starts[0].target, "https://portal.example/cases/c1");
    assert_eq!(agent.discarded().await, vec!["remote_agent-1"]);
}

#[tokio::test]
async fn test_backends_are_tried_in_order() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;

    let agent = MockBackend::new("remote_agent")
        .with_behavior(MockBehavior::FailStart("agent unreachable".to_string()));
    let cloud = MockBackend::new("cloud_agent").with_behavior(MockBehavior::FailJob {
        polls: 1,
        reason: "login rejected".to_string(),
    });
    let script = MockBackend::new("scripted_browser");
    let orchestrator = harness.orchestrator(&[agent.clone(), cloud.clone(), script.clone()]);

    let report = orchestrator.run_cycle().await;

    match only_outcome(&report) {
        CaseOutcome::Acquired { backend, .. } => assert_eq!(backend, "scripted_browser"),
        other => panic!("expected acquired, got {:?}", other),
    }
    assert_eq!(agent.start_count().await, 1);
    assert_eq!(cloud.start_count().await, 1);
    assert_eq!(script.start_count().await, 1);
    assert_eq!(cloud.collect_count().await, 0);
    assert!(agent.discarded().await.is_empty());
    assert_eq!(cloud.discarded().await.len(), 1);
    assert_eq!(script.discarded().await.len(), 1);

    // The last failure before success stays visible on the record.
    assert!(harness.failure_reason("c1").await.contains("login rejected"));
    assert_eq!(harness.status("c1").await, CaseStatus::Acquired);
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_all_backends_failing_marks_case_failed() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;

    let agent = MockBackend::new("remote_agent")
        .with_behavior(MockBehavior::FailStart("agent unreachable".to_string()));
    let transfer = MockBackend::new("direct_transfer")
        .with_behavior(MockBehavior::FailStart("403 forbidden".to_string()));
    let orchestrator = harness.orchestrator(&[agent, transfer]);

    let report = orchestrator.run_cycle().await;

    assert!(matches!(only_outcome(&report), CaseOutcome::Failed { .. }));
    assert_eq!(harness.status("c1").await, CaseStatus::Failed);
    let reason = harness.failure_reason("c1").await;
    assert!(reason.contains("direct_transfer"), "reason: {}", reason);
    assert!(reason.contains("403 forbidden"), "reason: {}", reason);
    assert!(harness.relay.uploads().await.is_empty());
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_success_without_evidence_advances() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;

    let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::Succeed {
        polls: 1,
        files: vec![("screenshot-1.png".to_string(), b"pixels".to_vec())],
    });
    let script = MockBackend::new("scripted_browser");
    let orchestrator = harness.orchestrator(&[agent.clone(), script]);

    let report = orchestrator.run_cycle().await;

    match only_outcome(&report) {
        CaseOutcome::Acquired { backend, .. } => assert_eq!(backend, "scripted_browser"),
        other => panic!("expected acquired, got {:?}", other),
    }
    assert_eq!(agent.collect_count().await, 1);
    assert!(harness.failure_reason("c1").await.contains("no new evidence"));
    assert!(!harness.root.path().join("Jane Doe (c1)/screenshot-1.png").exists());
}

// =============================================================================
// Timeouts and poll errors
// =============================================================================

#[tokio::test]
async fn test_attempt_timeout_cancels_once_and_falls_through() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;

    let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::Hang);
    let script = MockBackend::new("scripted_browser");
    let config = OrchestratorConfig {
        attempt_timeout_ms: 100,
        inactivity_timeout_ms: 10_000,
        ..fixtures::fast_orchestrator_config()
    };
    let orchestrator = harness.orchestrator_with("w1", config, &[agent.clone(), script.clone()]);

    let report = orchestrator.run_cycle().await;

    assert!(matches!(only_outcome(&report), CaseOutcome::Acquired { .. }));
    assert_eq!(agent.cancel_count().await, 1);
    assert_eq!(agent.discarded().await.len(), 1);
    assert_eq!(script.cancel_count().await, 0);
    assert!(harness.failure_reason("c1").await.contains("attempt timeout"));
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_inactivity_timeout_cancels_job() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;

    let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::Hang);
    let config = OrchestratorConfig {
        attempt_timeout_ms: 10_000,
        inactivity_timeout_ms: 100,
        ..fixtures::fast_orchestrator_config()
    };
    let orchestrator = harness.orchestrator_with("w1", config, &[agent.clone()]);

    let report = orchestrator.run_cycle().await;

    assert!(matches!(only_outcome(&report), CaseOutcome::Failed { .. }));
    assert_eq!(agent.cancel_count().await, 1);
    assert!(harness.failure_reason("c1").await.contains("no activity"));
    assert_eq!(harness.status("c1").await, CaseStatus::Failed);
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_repeated_poll_errors_give_up() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;

    let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::PollErrors);
    let orchestrator = harness.orchestrator(&[agent.clone()]);

    let report = orchestrator.run_cycle().await;

    assert!(matches!(only_outcome(&report), CaseOutcome::Failed { .. }));
    assert_eq!(agent.cancel_count().await, 1);
    assert!(harness
        .failure_reason("c1")
        .await
        .contains("3 consecutive poll errors"));
    harness.assert_released("c1").await;
}

// =============================================================================
// Lock release on every exit path
// =============================================================================

#[tokio::test]
async fn test_lock_released_when_acquiring_write_fails() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    harness
        .store
        .fail_on(StoreOp::SetStatus(CaseStatus::Acquiring))
        .await;

    let agent = MockBackend::new("remote_agent");
    let orchestrator = harness.orchestrator(&[agent.clone()]);
    let report = orchestrator.run_cycle().await;

    assert!(matches!(only_outcome(&report), CaseOutcome::Failed { .. }));
    assert_eq!(agent.start_count().await, 0);
    assert_eq!(harness.status("c1").await, CaseStatus::Failed);
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_unrecorded_job_is_canceled() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    harness.store.fail_on(StoreOp::SetActiveJob).await;

    let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::Hang);
    let orchestrator = harness.orchestrator(&[agent.clone()]);
    let report = orchestrator.run_cycle().await;

    assert!(matches!(only_outcome(&report), CaseOutcome::Failed { .. }));
    assert_eq!(agent.start_count().await, 1);
    assert_eq!(agent.cancel_count().await, 1);
    assert!(harness.failure_reason("c1").await.contains("could not record job"));
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_panicking_backend_fails_case_and_releases() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    harness.add_case("c2", "John Roe").await;

    let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::PanicOnStart);
    let orchestrator = harness.orchestrator(&[agent.clone()]);
    let report = orchestrator.run_cycle().await;

    assert_eq!(report.cases.len(), 2);
    for case_id in ["c1", "c2"] {
        assert_eq!(harness.status(case_id).await, CaseStatus::Failed);
        assert!(harness
            .failure_reason(case_id)
            .await
            .contains("internal error"));
        harness.assert_released(case_id).await;
    }
}

// =============================================================================
// Relay
// =============================================================================

#[tokio::test]
async fn test_relay_failure_never_reaches_acquired() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    harness.relay.set_fail_uploads(true).await;

    let orchestrator = harness.orchestrator(&[MockBackend::new("remote_agent")]);
    let report = orchestrator.run_cycle().await;

    assert!(matches!(only_outcome(&report), CaseOutcome::Failed { .. }));
    assert!(!harness
        .store
        .status_history("c1")
        .await
        .contains(&CaseStatus::Acquired));
    let case = harness.store.case("c1").await.unwrap();
    assert!(case.upload_reference.is_none());
    assert!(harness.failure_reason("c1").await.starts_with("relay failed"));
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_acquired_write_failure_marks_failed() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    harness
        .store
        .fail_on(StoreOp::SetStatus(CaseStatus::Acquired))
        .await;

    let orchestrator = harness.orchestrator(&[MockBackend::new("remote_agent")]);
    orchestrator.run_cycle().await;

    assert_eq!(harness.status("c1").await, CaseStatus::Failed);
    assert!(harness
        .failure_reason("c1")
        .await
        .contains("could not mark case acquired"));
    harness.assert_released("c1").await;
}

// =============================================================================
// Pre-filter, claims and dedup
// =============================================================================

#[tokio::test]
async fn test_prefilter_marks_not_applicable() {
    let harness = TestHarness::new();
    harness
        .store
        .insert(fixtures::case("c1", "Jane Doe").with_notes("Evidence sent via email on 3/2"))
        .await;

    let agent = MockBackend::new("remote_agent");
    let orchestrator = harness.orchestrator(&[agent.clone()]);
    let report = orchestrator.run_cycle().await;

    assert!(matches!(
        only_outcome(&report),
        CaseOutcome::NotApplicable { .. }
    ));
    assert_eq!(agent.start_count().await, 0);
    assert_eq!(harness.status("c1").await, CaseStatus::NotApplicable);
    // Why the case was skipped stays visible to operators.
    assert!(harness.failure_reason("c1").await.contains("sent via email"));
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_case_locked_elsewhere_is_skipped() {
    let harness = TestHarness::new();
    let mut case = fixtures::case("c1", "Jane Doe");
    case.lock_owner = Some("w2".to_string());
    harness.store.insert(case).await;

    let agent = MockBackend::new("remote_agent");
    let orchestrator = harness.orchestrator(&[agent.clone()]);
    let report = orchestrator.run_cycle().await;

    assert_eq!(only_outcome(&report), &CaseOutcome::Skipped);
    assert_eq!(agent.start_count().await, 0);
    assert_eq!(harness.status("c1").await, CaseStatus::Eligible);
    assert_eq!(
        harness.store.case("c1").await.unwrap().lock_owner.as_deref(),
        Some("w2")
    );
}

#[tokio::test]
async fn test_recollecting_same_output_stores_no_duplicates() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    let agent = MockBackend::new("remote_agent");
    let orchestrator = harness.orchestrator(&[agent]);

    orchestrator.run_cycle().await;
    assert_eq!(harness.status("c1").await, CaseStatus::Acquired);

    // A double claim re-runs the same backend output into the same folder.
    harness
        .store
        .update("c1", |case| {
            case.status = CaseStatus::Eligible;
            case.upload_reference = None;
        })
        .await;
    let report = orchestrator.run_cycle().await;

    match only_outcome(&report) {
        CaseOutcome::Failed { reason } => assert!(reason.contains("no new evidence")),
        other => panic!("expected failed, got {:?}", other),
    }
    let files: Vec<_> = std::fs::read_dir(harness.root.path().join("Jane Doe (c1)"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_namesakes_acquire_into_separate_folders() {
    let harness = TestHarness::new();
    harness.add_case("c1", "John Smith").await;
    harness.add_case("c2", "John Smith").await;

    // Both jobs yield byte-identical evidence.
    let orchestrator = harness.orchestrator(&[MockBackend::new("remote_agent")]);
    let report = orchestrator.run_cycle().await;

    assert_eq!(report.cases.len(), 2);
    for case_id in ["c1", "c2"] {
        assert_eq!(harness.status(case_id).await, CaseStatus::Acquired, "{}", case_id);
        let folder = format!("John Smith ({})/evidence.pdf", case_id);
        assert!(harness.root.path().join(folder).exists());
    }

    let first = harness.store.case("c1").await.unwrap().upload_reference;
    let second = harness.store.case("c2").await.unwrap().upload_reference;
    assert!(first.is_some());
    assert_ne!(first, second);
    assert_eq!(harness.relay.uploads().await.len(), 2);
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_reconcile_resets_only_dead_state() {
    let harness = TestHarness::new();
    let agent = MockBackend::new("agent");
    let running = agent
        .start(&StartRequest {
            case_id: "live".to_string(),
            case_name: "Live".to_string(),
            target: "https://portal.example/cases/live".to_string(),
            credentials: None,
        })
        .await
        .unwrap();

    let store = &harness.store;
    store
        .insert(fixtures::acquiring_case("live", "Live", "w2", &running.to_string()))
        .await;
    store
        .insert(fixtures::acquiring_case("dead", "Dead", "w2", "agent:agent-99"))
        .await;
    store
        .insert(fixtures::acquiring_case("ghost", "Ghost", "w2", "ghost:17"))
        .await;
    store
        .insert(fixtures::acquiring_case("garbled", "Garbled", "w2", "garbage"))
        .await;

    let mut stale = fixtures::case("stale", "Stale").with_status(CaseStatus::Claimed);
    stale.lock_owner = Some("w2".to_string());
    stale.updated_at = Some(Utc::now() - chrono::Duration::hours(2));
    store.insert(stale).await;

    let mut fresh = fixtures::case("fresh", "Fresh").with_status(CaseStatus::Claimed);
    fresh.lock_owner = Some("w2".to_string());
    store.insert(fresh).await;

    let mut mine = fixtures::case("mine", "Mine").with_status(CaseStatus::Claimed);
    mine.lock_owner = Some("w1".to_string());
    store.insert(mine).await;

    store
        .insert(fixtures::case("done", "Done").with_status(CaseStatus::Acquired))
        .await;

    let orchestrator = harness.orchestrator(&[agent.clone()]);
    let report = orchestrator.reconcile().await;

    assert_eq!(report.examined, 7);
    assert_eq!(report.reset, vec!["dead", "garbled", "stale", "mine"]);

    for case_id in ["dead", "garbled", "stale", "mine"] {
        let case = store.case(case_id).await.unwrap();
        assert_eq!(case.status, CaseStatus::Eligible, "{}", case_id);
        assert!(case.lock_owner.is_none());
        assert!(case.active_job_ref.is_none());
    }
    for case_id in ["live", "ghost", "fresh"] {
        assert!(store.case(case_id).await.unwrap().status.is_in_progress());
    }
    assert_eq!(harness.status("done").await, CaseStatus::Acquired);

    // A second sweep finds nothing new.
    assert!(orchestrator.reconcile().await.reset.is_empty());
}

#[tokio::test]
async fn test_reconcile_keeps_job_reported_running() {
    let harness = TestHarness::new();
    let agent = MockBackend::new("agent");
    agent.set_liveness("remote-7", Liveness::Running).await;
    harness
        .store
        .insert(fixtures::acquiring_case("c1", "Jane Doe", "w2", "agent:remote-7"))
        .await;

    let orchestrator = harness.orchestrator(&[agent.clone()]);
    assert!(orchestrator.reconcile().await.reset.is_empty());
    assert_eq!(harness.status("c1").await, CaseStatus::Acquiring);

    agent.set_liveness("remote-7", Liveness::NotRunning).await;
    assert_eq!(orchestrator.reconcile().await.reset, vec!["c1"]);
    assert_eq!(harness.status("c1").await, CaseStatus::Eligible);
}

#[tokio::test]
async fn test_sweep_leaves_case_finished_after_listing() {
    let harness = TestHarness::new();
    harness
        .store
        .insert(fixtures::acquiring_case("c1", "Jane Doe", "w2", "agent:agent-99"))
        .await;

    let store = Arc::new(FinishedAfterListing {
        inner: harness.store.clone(),
        case_id: "c1".to_string(),
    }) as Arc<dyn RecordStore>;
    let orchestrator = harness.orchestrator_on(
        store,
        "w1",
        fixtures::fast_orchestrator_config(),
        &[MockBackend::new("agent")],
    );

    let report = orchestrator.reconcile().await;

    assert_eq!(report.examined, 1);
    assert!(report.reset.is_empty());
    let case = harness.store.case("c1").await.unwrap();
    assert_eq!(case.status, CaseStatus::Acquired);
    assert!(case.upload_reference.is_some());
    assert_eq!(harness.store.release_count("c1").await, 0);
}

#[tokio::test]
async fn test_long_relay_survives_another_workers_sweep() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    harness.relay.set_upload_delay(Duration::from_millis(1_000)).await;

    let config = OrchestratorConfig {
        stale_claim_ms: 200,
        ..fixtures::fast_orchestrator_config()
    };
    let agent = MockBackend::new("remote_agent");
    let owner = Arc::new(harness.orchestrator_with("w1", config.clone(), &[agent.clone()]));
    let sweeper = harness.orchestrator_with("w2", config, &[agent.clone()]);

    let running = {
        let owner = Arc::clone(&owner);
        tokio::spawn(async move { owner.run_cycle().await })
    };

    // Collection is done once the evidence sits in the case folder; the relay follows.
    let collected = harness.root.path().join("Jane Doe (c1)/evidence.pdf");
    let relaying = harness
        .wait_for(Duration::from_secs(5), || {
            let collected = collected.clone();
            async move { collected.exists() }
        })
        .await;
    assert!(relaying, "evidence never collected");
    tokio::time::sleep(Duration::from_millis(400)).await;

    let case = harness.store.case("c1").await.unwrap();
    assert_eq!(case.status, CaseStatus::Acquiring);
    assert!(case.active_job_ref.is_none());
    assert_eq!(case.lock_owner.as_deref(), Some("w1"));

    assert!(sweeper.reconcile().await.reset.is_empty());
    assert!(harness.store.touch_count("c1").await > 0);

    let report = running.await.unwrap();
    assert!(matches!(only_outcome(&report), CaseOutcome::Acquired { .. }));
    assert_eq!(harness.status("c1").await, CaseStatus::Acquired);
    harness.assert_released("c1").await;
}

// =============================================================================
// Concurrency ceiling
// =============================================================================

#[tokio::test]
async fn test_cycle_skipped_at_ceiling() {
    let harness = TestHarness::new();
    let agent = MockBackend::new("agent").with_behavior(MockBehavior::Hang);
    for id in ["a", "b"] {
        let job = agent
            .start(&StartRequest {
                case_id: id.to_string(),
                case_name: id.to_string(),
                target: format!("https://portal.example/cases/{}", id),
                credentials: None,
            })
            .await
            .unwrap();
        harness
            .store
            .insert(fixtures::acquiring_case(id, id, "w2", &job.to_string()))
            .await;
    }
    harness.add_case("c1", "Jane Doe").await;

    let orchestrator = harness.orchestrator(&[agent.clone()]);
    assert_eq!(orchestrator.live_job_count().await.unwrap(), 2);

    let report = orchestrator.run_cycle().await;
    assert!(report.at_ceiling);
    assert!(report.cases.is_empty());
    assert_eq!(agent.start_count().await, 2);
    assert_eq!(harness.status("c1").await, CaseStatus::Eligible);
}

#[tokio::test]
async fn test_ceiling_holds_across_workers() {
    let harness = TestHarness::new();
    for i in 0..5 {
        harness
            .add_case(&format!("c{}", i), &format!("Case {}", i))
            .await;
    }

    let agent = MockBackend::new("agent").with_behavior(MockBehavior::Succeed {
        polls: 15,
        files: vec![("evidence.pdf".to_string(), b"%PDF-1.7".to_vec())],
    });
    let workers: Vec<_> = (1..=3)
        .map(|n| {
            Arc::new(harness.orchestrator_with(
                &format!("w{}", n),
                fixtures::fast_orchestrator_config(),
                &[agent.clone()],
            ))
        })
        .collect();

    let mut handles = Vec::new();
    for worker in &workers {
        let worker = Arc::clone(worker);
        let store = harness.store.clone();
        handles.push(tokio::spawn(async move {
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while std::time::Instant::now() < deadline {
                let cases = store.cases().await;
                if cases.iter().all(|c| c.status == CaseStatus::Acquired) {
                    break;
                }
                worker.run_cycle().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(agent.max_running().await <= 2, "ceiling exceeded");
    for case in harness.store.cases().await {
        assert_eq!(case.status, CaseStatus::Acquired, "{}", case.id);
        assert!(case.lock_owner.is_none());
    }
}

// =============================================================================
// Start / stop
// =============================================================================

#[tokio::test]
async fn test_shutdown_interrupts_running_attempt() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;

    let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::Hang);
    let orchestrator = harness.orchestrator(&[agent.clone()]);
    orchestrator.start().await;
    assert!(orchestrator.is_running());

    let store = harness.store.clone();
    let started = harness
        .wait_for(Duration::from_secs(5), || {
            let store = store.clone();
            async move {
                store
                    .case("c1")
                    .await
                    .is_some_and(|c| c.active_job_ref.is_some())
            }
        })
        .await;
    assert!(started, "job never started");

    let status = orchestrator.status().await;
    assert_eq!(status.current_case.as_deref(), Some("c1"));
    assert_eq!(status.in_progress_count, 1);

    orchestrator.stop().await;
    assert!(!orchestrator.is_running());

    assert_eq!(agent.cancel_count().await, 1);
    assert_eq!(harness.status("c1").await, CaseStatus::Eligible);
    harness.assert_released("c1").await;
}

#[tokio::test]
async fn test_status_counts() {
    let harness = TestHarness::new();
    harness.add_case("c1", "Jane Doe").await;
    harness.add_case("c2", "John Roe").await;
    harness
        .store
        .insert(fixtures::case("c3", "Old").with_status(CaseStatus::Failed))
        .await;

    let orchestrator = harness.orchestrator(&[MockBackend::new("remote_agent")]);
    let config = OrchestratorConfig {
        fetch_limit: 1,
        ..fixtures::fast_orchestrator_config()
    };
    let limited = harness.orchestrator_with("w1", config, &[MockBackend::new("remote_agent")]);
    assert_eq!(limited.run_cycle().await.fetched, 1);

    let status = orchestrator.status().await;
    assert!(!status.running);
    assert_eq!(status.worker_id, "w1");
    assert_eq!(status.eligible_count, 1);
    assert_eq!(status.acquired_count, 1);
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.live_jobs, 0);
    assert_eq!(status.max_concurrent, 2);
}

#[tokio::test]
async fn test_empty_chain_is_rejected() {
    let harness = TestHarness::new();
    let result = AcquisitionOrchestrator::new(
        fixtures::fast_orchestrator_config(),
        "w1",
        Arc::new(harness.store.clone()) as Arc<dyn RecordStore>,
        Vec::new(),
        ArtifactCollector::new(CollectorConfig::default()),
        Arc::new(harness.relay.clone()) as Arc<dyn RelaySink>,
        false,
        TextServices::rules(),
    );
    assert!(matches!(result, Err(OrchestratorError::NoBackends)));
}
