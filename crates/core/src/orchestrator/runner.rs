//! Acquisition orchestrator implementation.
//!
//! Two loops run per worker process:
//! - Scheduler: one case at a time, claim, backend chain, relay, release
//! - Reconciliation: resets in-progress cases whose job is gone
//!
//! Parallelism comes from running several workers against the same store.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::AcquisitionBackend;
use crate::collector::ArtifactCollector;
use crate::metrics;
use crate::record_store::{Case, CaseStatus, RecordStore};
use crate::relay::RelaySink;
use crate::text::TextServices;

use super::claim::ClaimGuard;
use super::config::OrchestratorConfig;
use super::throttle::LaunchThrottle;
use super::types::{
    CaseOutcome, CaseReport, CycleReport, OrchestratorError, OrchestratorStatus, ReconcileReport,
};

/// State shared by the orchestrator handle and its loops.
pub(super) struct OrchestratorCore {
    pub(super) config: OrchestratorConfig,
    pub(super) worker_id: String,
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) backends: Vec<Arc<dyn AcquisitionBackend>>,
    pub(super) collector: ArtifactCollector,
    pub(super) relay: Arc<dyn RelaySink>,
    pub(super) delete_after_upload: bool,
    pub(super) text: TextServices,

    /// Cases this process is working on; the sweep leaves them alone.
    pub(super) active_cases: RwLock<HashSet<String>>,
    pub(super) throttle: Mutex<LaunchThrottle>,
    cycle_lock: Mutex<()>,
    pub(super) shutting_down: AtomicBool,
    pub(super) shutdown_tx: broadcast::Sender<()>,
}

impl OrchestratorCore {
    pub(super) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(super) fn backend(&self, name: &str) -> Option<&Arc<dyn AcquisitionBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    /// Sleep for `duration` unless shutdown arrives first. Returns `false` on shutdown.
    pub(super) async fn pause(&self, duration: Duration) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => false,
            _ = tokio::time::sleep(duration) => !self.is_shutting_down(),
        }
    }

    /// One scheduler pass: fetch eligible cases and process them one by one.
    pub(super) async fn run_cycle(&self) -> CycleReport {
        let _single_flight = self.cycle_lock.lock().await;
        let mut report = CycleReport::default();

        if self.is_shutting_down() {
            return report;
        }

        match self.live_job_count().await {
            Ok(live) if live >= self.config.max_concurrent => {
                debug!(
                    "Concurrency ceiling reached ({}/{}), skipping cycle",
                    live, self.config.max_concurrent
                );
                report.at_ceiling = true;
                return report;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Could not count live jobs, skipping cycle: {}", e);
                return report;
            }
        }

        let cases = match self.store.fetch_eligible(self.config.fetch_limit).await {
            Ok(cases) => cases,
            Err(e) => {
                warn!("Failed to fetch eligible cases: {}", e);
                return report;
            }
        };
        report.fetched = cases.len();
        if !cases.is_empty() {
            info!("Found {} eligible cases", cases.len());
        }

        for case in cases {
            let wait = self.throttle.lock().await.remaining();
            if !self.pause(wait).await {
                break;
            }
            self.throttle.lock().await.mark_launch(Instant::now());

            let case_id = case.id.clone();
            let outcome = self.process_case(case).await;
            let deferred = outcome == CaseOutcome::Deferred;
            report.cases.push(CaseReport { case_id, outcome });

            if deferred {
                report.at_ceiling = true;
                break;
            }
            if self.is_shutting_down() {
                break;
            }
        }

        report
    }

    /// Claim and process one case. Every exit path releases the claim exactly once.
    pub(super) async fn process_case(&self, case: Case) -> CaseOutcome {
        // Registered before claiming so a concurrent sweep never sees our
        // fresh claim as abandoned.
        self.active_cases.write().await.insert(case.id.clone());

        let claimed = match self.store.try_claim(&case.id, &self.worker_id).await {
            Ok(true) => {
                metrics::CLAIMS.with_label_values(&["claimed"]).inc();
                true
            }
            Ok(false) => {
                metrics::CLAIMS.with_label_values(&["lost"]).inc();
                debug!("Case {} was claimed elsewhere", case.id);
                false
            }
            Err(e) => {
                metrics::CLAIMS.with_label_values(&["error"]).inc();
                warn!("Failed to claim case {}: {}", case.id, e);
                false
            }
        };
        if !claimed {
            self.active_cases.write().await.remove(&case.id);
            return self.finished(CaseOutcome::Skipped);
        }

        let guard = ClaimGuard::new(Arc::clone(&self.store), case.id.clone())
            .with_heartbeat(self.worker_id.clone(), self.config.claim_heartbeat_interval());

        // Our own claim is part of the count now, so exceeding the ceiling
        // means another worker launched in between.
        let over_ceiling = match self.live_job_count().await {
            Ok(live) => live > self.config.max_concurrent,
            Err(e) => {
                warn!("Could not count live jobs for case {}: {}", case.id, e);
                true
            }
        };

        let outcome = if over_ceiling {
            info!("Concurrency ceiling reached, handing case {} back", case.id);
            self.reset_to_eligible(&case.id).await;
            CaseOutcome::Deferred
        } else {
            info!("Processing case {} ({})", case.id, case.display_name);
            match AssertUnwindSafe(self.acquire(&case)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Processing of case {} panicked: {}", case.id, message);
                    let reason = format!("internal error: {}", message);
                    if let Err(e) = self.store.set_active_job(&case.id, None).await {
                        warn!("Failed to clear job reference of case {}: {}", case.id, e);
                    }
                    self.mark_failed(&case.id, &reason).await;
                    CaseOutcome::Failed { reason }
                }
            }
        };

        guard.release().await;
        self.active_cases.write().await.remove(&case.id);
        info!("Case {} finished: {}", case.id, outcome.label());
        self.finished(outcome)
    }

    fn finished(&self, outcome: CaseOutcome) -> CaseOutcome {
        metrics::CASES_FINISHED
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    pub(super) async fn mark_failed(&self, case_id: &str, reason: &str) {
        if let Err(e) = self.store.set_failure_reason(case_id, reason).await {
            warn!("Failed to record failure reason of case {}: {}", case_id, e);
        }
        if let Err(e) = self.store.set_status(case_id, CaseStatus::Failed).await {
            error!("Failed to mark case {} as failed: {}", case_id, e);
        }
    }

    /// Put a case back in the queue. The caller still owns the lock.
    pub(super) async fn reset_to_eligible(&self, case_id: &str) {
        if let Err(e) = self.store.set_active_job(case_id, None).await {
            warn!("Failed to clear job reference of case {}: {}", case_id, e);
        }
        if let Err(e) = self.store.set_status(case_id, CaseStatus::Eligible).await {
            error!("Failed to reset case {} to eligible: {}", case_id, e);
        }
    }

    async fn status(&self, running: bool) -> OrchestratorStatus {
        let count = |status: CaseStatus| async move {
            self.store.count_by_status(status).await.unwrap_or_else(|e| {
                warn!("Failed to count {} cases: {}", status, e);
                0
            })
        };

        let in_progress_count = match self.store.list_in_progress().await {
            Ok(cases) => cases.len(),
            Err(e) => {
                warn!("Failed to list in-progress cases: {}", e);
                0
            }
        };

        OrchestratorStatus {
            running,
            worker_id: self.worker_id.clone(),
            current_case: self.active_cases.read().await.iter().next().cloned(),
            eligible_count: count(CaseStatus::Eligible).await,
            in_progress_count,
            acquired_count: count(CaseStatus::Acquired).await,
            failed_count: count(CaseStatus::Failed).await,
            live_jobs: self.live_job_count().await.unwrap_or(0),
            max_concurrent: self.config.max_concurrent,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The acquisition orchestrator: claims cases from the record store and
/// drives them through the backend chain.
pub struct AcquisitionOrchestrator {
    core: Arc<OrchestratorCore>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AcquisitionOrchestrator {
    /// Create a new orchestrator. `backends` is the fallback chain in priority order.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        worker_id: impl Into<String>,
        store: Arc<dyn RecordStore>,
        backends: Vec<Arc<dyn AcquisitionBackend>>,
        collector: ArtifactCollector,
        relay: Arc<dyn RelaySink>,
        delete_after_upload: bool,
        text: TextServices,
    ) -> Result<Self, OrchestratorError> {
        if backends.is_empty() {
            return Err(OrchestratorError::NoBackends);
        }

        let (shutdown_tx, _) = broadcast::channel(4);
        let throttle = LaunchThrottle::new(Duration::from_millis(config.min_launch_interval_ms));

        Ok(Self {
            core: Arc::new(OrchestratorCore {
                config,
                worker_id: worker_id.into(),
                store,
                backends,
                collector,
                relay,
                delete_after_upload,
                text,
                active_cases: RwLock::new(HashSet::new()),
                throttle: Mutex::new(throttle),
                cycle_lock: Mutex::new(()),
                shutting_down: AtomicBool::new(false),
                shutdown_tx,
            }),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.core.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the orchestrator (spawns background tasks).
    ///
    /// Runs one reconciliation sweep first so cases left behind by a crash
    /// are back in the queue before the first cycle.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting acquisition orchestrator as worker {}", self.core.worker_id);
        self.core.shutting_down.store(false, Ordering::SeqCst);

        let report = self.core.reconcile().await;
        if !report.reset.is_empty() {
            info!("Startup sweep reset {} stale cases", report.reset.len());
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_scheduler_loop());
        tasks.push(self.spawn_reconcile_loop());

        info!("Acquisition orchestrator started");
    }

    /// Stop the orchestrator gracefully.
    ///
    /// An attempt in progress is interrupted: its job is canceled and the case
    /// goes back to eligible.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping acquisition orchestrator");
        self.core.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.core.shutdown_tx.send(());

        let grace = Duration::from_millis(self.core.config.shutdown_grace_ms);
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!("Orchestrator loop did not stop within {:?}, aborting", grace);
                abort.abort();
            }
        }

        info!("Acquisition orchestrator stopped");
    }

    /// Run one scheduler cycle now.
    pub async fn run_cycle(&self) -> CycleReport {
        self.core.run_cycle().await
    }

    /// Run one reconciliation sweep now.
    pub async fn reconcile(&self) -> ReconcileReport {
        self.core.reconcile().await
    }

    /// In-progress cases backed by a live job, across all workers.
    pub async fn live_job_count(&self) -> Result<usize, OrchestratorError> {
        Ok(self.core.live_job_count().await?)
    }

    /// Get current orchestrator status.
    pub async fn status(&self) -> OrchestratorStatus {
        self.core.status(self.is_running()).await
    }

    fn spawn_scheduler_loop(&self) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = core.shutdown_tx.subscribe();
        let interval = Duration::from_millis(core.config.scheduler_poll_interval_ms);

        tokio::spawn(async move {
            info!("Scheduler loop started");
            loop {
                if !running.load(Ordering::Relaxed) || core.is_shutting_down() {
                    break;
                }

                let report = core.run_cycle().await;
                if !report.cases.is_empty() {
                    debug!("Cycle processed {} cases", report.cases.len());
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Scheduler loop stopped");
        })
    }

    fn spawn_reconcile_loop(&self) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = core.shutdown_tx.subscribe();
        let interval = Duration::from_millis(core.config.reconcile_interval_ms);

        tokio::spawn(async move {
            info!("Reconciliation loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reconciliation loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let report = core.reconcile().await;
                        if !report.reset.is_empty() {
                            info!("Reconciliation reset {} stale cases", report.reset.len());
                        }
                    }
                }
            }
            info!("Reconciliation loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
