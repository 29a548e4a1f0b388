//! The per-case state machine: pre-filter, backend chain, collection, relay.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::backend::{AcquisitionBackend, JobRef, JobStatus, StartRequest};
use crate::backoff::backoff_delay;
use crate::collector::case_folder_name;
use crate::metrics;
use crate::record_store::{Case, CaseStatus};
use crate::relay::relay_case_folder;

use super::runner::OrchestratorCore;
use super::types::CaseOutcome;

/// How one backend attempt ended.
#[derive(Debug)]
enum AttemptResult {
    Acquired { artifacts: usize },
    Failed(String),
    Interrupted,
}

/// How observing a started job ended.
#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed(String),
    Interrupted,
}

impl OrchestratorCore {
    /// Drive a claimed case to a terminal status (or back to eligible on shutdown).
    pub(super) async fn acquire(&self, case: &Case) -> CaseOutcome {
        let decision = self.text.prefilter.should_acquire(case).await;
        if !decision.proceed {
            info!("Case {} not applicable: {}", case.id, decision.reason);
            // The store has no other free-text field the orchestrator owns;
            // notes belong to operators.
            if let Err(e) = self.store.set_failure_reason(&case.id, &decision.reason).await {
                warn!("Failed to record skip reason of case {}: {}", case.id, e);
            }
            if let Err(e) = self.store.set_status(&case.id, CaseStatus::NotApplicable).await {
                error!("Failed to mark case {} not applicable: {}", case.id, e);
            }
            return CaseOutcome::NotApplicable {
                reason: decision.reason,
            };
        }

        if let Err(e) = self.store.set_status(&case.id, CaseStatus::Acquiring).await {
            let reason = format!("could not mark case acquiring: {}", e);
            self.mark_failed(&case.id, &reason).await;
            return CaseOutcome::Failed { reason };
        }

        let credentials = match case.credential_blob.as_deref() {
            Some(blob) if !blob.trim().is_empty() => {
                self.text.credential_parser.parse(blob).await
            }
            _ => None,
        };
        let request = StartRequest {
            case_id: case.id.clone(),
            case_name: case_folder_name(&case.display_name, &case.id),
            target: case.acquisition_target.clone(),
            credentials,
        };
        let destination = self.collector.destination_for(case);

        let mut last_reason = None;
        for backend in &self.backends {
            if self.is_shutting_down() {
                return self.interrupted(case).await;
            }

            match self.run_attempt(backend, case, &request, &destination).await {
                AttemptResult::Acquired { artifacts } => {
                    return self
                        .finish_acquired(
                            case,
                            backend.name(),
                            artifacts,
                            &request.case_name,
                            &destination,
                        )
                        .await;
                }
                AttemptResult::Failed(reason) => {
                    warn!("Backend {} failed for case {}: {}", backend.name(), case.id, reason);
                    if let Err(e) = self.store.set_failure_reason(&case.id, &reason).await {
                        warn!("Failed to record failure reason of case {}: {}", case.id, e);
                    }
                    last_reason = Some(reason);
                }
                AttemptResult::Interrupted => return self.interrupted(case).await,
            }
        }

        let reason = last_reason.unwrap_or_else(|| "no backend succeeded".to_string());
        error!("All backends failed for case {}: {}", case.id, reason);
        self.mark_failed(&case.id, &reason).await;
        CaseOutcome::Failed { reason }
    }

    async fn interrupted(&self, case: &Case) -> CaseOutcome {
        info!("Acquisition of case {} interrupted by shutdown", case.id);
        self.reset_to_eligible(&case.id).await;
        CaseOutcome::Interrupted
    }

    /// One backend: start, record the job, observe, collect.
    ///
    /// The job reference is cleared as soon as the job stops running, so
    /// collection and relay run with a jobless claim kept fresh by the claim
    /// heartbeat. The backend discards the job on every exit.
    async fn run_attempt(
        &self,
        backend: &Arc<dyn AcquisitionBackend>,
        case: &Case,
        request: &StartRequest,
        destination: &Path,
    ) -> AttemptResult {
        let name = backend.name();
        let started = Instant::now();

        let job = match backend.start(request).await {
            Ok(job) => job,
            Err(e) => {
                metrics::ACQUISITION_ATTEMPTS
                    .with_label_values(&[name, "start_failed"])
                    .inc();
                return AttemptResult::Failed(format!("{}: start failed: {}", name, e));
            }
        };
        info!("Case {} started job {}", case.id, job);

        let observed = match self.store.set_active_job(&case.id, Some(&job.to_string())).await {
            Ok(()) => self.observe_job(backend, &job).await,
            Err(e) => {
                self.cancel_job(backend, &job).await;
                JobOutcome::Failed(format!("could not record job {}: {}", job, e))
            }
        };

        if let Err(e) = self.store.set_active_job(&case.id, None).await {
            warn!("Failed to clear job reference of case {}: {}", case.id, e);
        }

        let result = match observed {
            JobOutcome::Succeeded => self.collect_job(backend, &job, destination).await,
            JobOutcome::Failed(reason) => AttemptResult::Failed(format!("{}: {}", name, reason)),
            JobOutcome::Interrupted => AttemptResult::Interrupted,
        };
        backend.discard(&job).await;

        let label = match &result {
            AttemptResult::Acquired { .. } => "acquired",
            AttemptResult::Failed(_) => "failed",
            AttemptResult::Interrupted => "interrupted",
        };
        metrics::ACQUISITION_ATTEMPTS
            .with_label_values(&[name, label])
            .inc();
        metrics::ATTEMPT_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    async fn collect_job(
        &self,
        backend: &Arc<dyn AcquisitionBackend>,
        job: &JobRef,
        destination: &Path,
    ) -> AttemptResult {
        let name = backend.name();
        let mut session = match self.collector.open(destination).await {
            Ok(session) => session,
            Err(e) => return AttemptResult::Failed(format!("{}: {}", name, e)),
        };
        let collected = backend.collect(job, &mut session).await;
        let stored = session.finish().await;

        match collected {
            Ok(_) if stored.is_empty() => AttemptResult::Failed(format!(
                "{}: job succeeded but produced no new evidence",
                name
            )),
            Ok(_) => {
                info!("Job {} stored {} new artifacts", job, stored.len());
                AttemptResult::Acquired {
                    artifacts: stored.len(),
                }
            }
            Err(e) => AttemptResult::Failed(format!("{}: collection failed: {}", name, e)),
        }
    }

    /// Poll until the job is terminal, a timeout fires, or shutdown arrives.
    async fn observe_job(&self, backend: &Arc<dyn AcquisitionBackend>, job: &JobRef) -> JobOutcome {
        let config = &self.config;
        let started = Instant::now();
        let started_at = Utc::now();
        let attempt_timeout = Duration::from_millis(config.attempt_timeout_ms);
        let inactivity_timeout = chrono::Duration::milliseconds(
            i64::try_from(config.inactivity_timeout_ms).unwrap_or(i64::MAX),
        );
        let mut consecutive_errors: u32 = 0;

        loop {
            let delay = if consecutive_errors == 0 {
                Duration::from_millis(config.job_poll_interval_ms)
            } else {
                backoff_delay(
                    config.job_poll_interval_ms,
                    consecutive_errors,
                    config.max_poll_backoff_ms,
                )
            };
            if !self.pause(delay).await {
                self.cancel_job(backend, job).await;
                return JobOutcome::Interrupted;
            }

            match backend.poll(job).await {
                JobStatus::Running => consecutive_errors = 0,
                JobStatus::Succeeded => return JobOutcome::Succeeded,
                JobStatus::Failed(reason) => return JobOutcome::Failed(reason),
                JobStatus::TimedOut => return JobOutcome::Failed("job timed out".to_string()),
                JobStatus::Canceled => return JobOutcome::Failed("job was canceled".to_string()),
                JobStatus::Retryable(e) => {
                    consecutive_errors += 1;
                    metrics::POLL_ERRORS.with_label_values(&[backend.name()]).inc();
                    warn!(
                        "Poll of {} failed ({}/{}): {}",
                        job, consecutive_errors, config.max_poll_errors, e
                    );
                    if consecutive_errors >= config.max_poll_errors {
                        self.cancel_job(backend, job).await;
                        return JobOutcome::Failed(format!(
                            "{} consecutive poll errors, last: {}",
                            consecutive_errors, e
                        ));
                    }
                }
            }

            if started.elapsed() >= attempt_timeout {
                self.cancel_job(backend, job).await;
                return JobOutcome::Failed(format!(
                    "exceeded attempt timeout of {}s",
                    attempt_timeout.as_secs()
                ));
            }

            let last_activity = backend
                .last_activity(job)
                .await
                .map_or(started_at, |at| at.max(started_at));
            if Utc::now() - last_activity >= inactivity_timeout {
                self.cancel_job(backend, job).await;
                return JobOutcome::Failed(format!(
                    "no activity for {}s",
                    inactivity_timeout.num_seconds()
                ));
            }

            debug!("Job {} still running", job);
        }
    }

    async fn cancel_job(&self, backend: &Arc<dyn AcquisitionBackend>, job: &JobRef) {
        info!("Canceling job {}", job);
        metrics::BACKEND_CANCELS
            .with_label_values(&[backend.name()])
            .inc();
        backend.cancel(job).await;
    }

    /// Relay, record the reference, then mark Acquired. Any failure here ends
    /// the case as Failed.
    async fn finish_acquired(
        &self,
        case: &Case,
        backend: &str,
        artifacts: usize,
        case_name: &str,
        destination: &Path,
    ) -> CaseOutcome {
        let report = match relay_case_folder(
            self.relay.as_ref(),
            destination,
            case_name,
            self.delete_after_upload,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => {
                let reason = format!("relay failed: {}", e);
                error!("Case {}: {}", case.id, reason);
                self.mark_failed(&case.id, &reason).await;
                return CaseOutcome::Failed { reason };
            }
        };

        if let Err(e) = self
            .store
            .set_upload_reference(&case.id, &report.reference)
            .await
        {
            let reason = format!("could not record upload reference: {}", e);
            self.mark_failed(&case.id, &reason).await;
            return CaseOutcome::Failed { reason };
        }

        if let Err(e) = self.store.set_status(&case.id, CaseStatus::Acquired).await {
            let reason = format!("could not mark case acquired: {}", e);
            self.mark_failed(&case.id, &reason).await;
            return CaseOutcome::Failed { reason };
        }

        info!(
            "Case {} acquired via {}: {} files relayed to {}",
            case.id, backend, report.files_uploaded, report.reference
        );
        CaseOutcome::Acquired {
            backend: backend.to_string(),
            artifacts,
            reference: report.reference,
        }
    }
}
