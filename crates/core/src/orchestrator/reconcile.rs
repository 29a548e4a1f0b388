//! Stale-state reconciliation and live-job accounting.
//!
//! Both look at every in-progress case in the store and ask the owning
//! backend whether the recorded job is really alive.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::backend::{JobRef, Liveness};
use crate::metrics;
use crate::record_store::{Case, CaseStatus, RecordStoreError};

use super::runner::OrchestratorCore;
use super::types::ReconcileReport;

impl OrchestratorCore {
    async fn job_liveness(&self, case: &Case, job_ref: &str) -> Liveness {
        let Some(job) = JobRef::parse(job_ref) else {
            warn!("Case {} has malformed job reference '{}'", case.id, job_ref);
            return Liveness::NotRunning;
        };
        match self.backend(&job.backend) {
            Some(backend) => backend.liveness(&job).await,
            None => {
                debug!("No backend '{}' for job {} of case {}", job.backend, job, case.id);
                Liveness::Unknown
            }
        }
    }

    /// Whether a jobless in-progress case was edited within the stale-claim window.
    fn is_recent(&self, case: &Case) -> bool {
        let stale_after = chrono::Duration::milliseconds(
            i64::try_from(self.config.stale_claim_ms).unwrap_or(i64::MAX),
        );
        match case.updated_at {
            Some(at) => Utc::now() - at < stale_after,
            None => true,
        }
    }

    /// In-progress cases backed by a live (or possibly live) job.
    pub(super) async fn live_job_count(&self) -> Result<usize, RecordStoreError> {
        let cases = self.store.list_in_progress().await?;
        let active = self.active_cases.read().await.clone();

        let mut live = 0;
        for case in &cases {
            let counted = match case.active_job_ref.as_deref() {
                Some(job_ref) => !matches!(
                    self.job_liveness(case, job_ref).await,
                    Liveness::NotRunning
                ),
                None => active.contains(&case.id) || self.is_recent(case),
            };
            if counted {
                live += 1;
            }
        }
        Ok(live)
    }

    /// Reset in-progress cases that no live job or worker stands behind.
    ///
    /// Cases this process is working on are never touched, and a job whose
    /// liveness cannot be determined keeps its case. Each case is read again
    /// right before the reset and left alone if it changed since the listing.
    pub(super) async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let cases = match self.store.list_in_progress().await {
            Ok(cases) => cases,
            Err(e) => {
                warn!("Reconciliation could not list in-progress cases: {}", e);
                return report;
            }
        };

        for case in cases {
            report.examined += 1;
            if self.active_cases.read().await.contains(&case.id) {
                continue;
            }

            let stale = match case.active_job_ref.as_deref() {
                Some(job_ref) => match self.job_liveness(&case, job_ref).await {
                    Liveness::NotRunning => Some(format!("job {} is not running", job_ref)),
                    Liveness::Running | Liveness::Unknown => None,
                },
                None if case.lock_owner.as_deref() == Some(self.worker_id.as_str()) => {
                    Some("claimed by this worker before a restart".to_string())
                }
                None if !self.is_recent(&case) => {
                    Some("claim without a job went stale".to_string())
                }
                None => None,
            };

            let Some(why) = stale else {
                continue;
            };

            match self.store.get(&case.id).await {
                Ok(current) if unchanged_since_listing(&case, &current) => {}
                Ok(current) => {
                    debug!(
                        "Case {} changed since listing (now {}), not resetting",
                        case.id, current.status
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Could not re-read case {} before reset: {}", case.id, e);
                    continue;
                }
            }

            info!("Resetting case {} to eligible: {}", case.id, why);
            if let Err(e) = self.store.set_active_job(&case.id, None).await {
                warn!("Failed to clear job reference of case {}: {}", case.id, e);
            }
            if let Err(e) = self.store.set_status(&case.id, CaseStatus::Eligible).await {
                error!("Failed to reset case {}: {}", case.id, e);
                continue;
            }
            self.store.release(&case.id).await;
            metrics::RECONCILED_CASES.inc();
            report.reset.push(case.id);
        }

        report
    }
}

/// Still in progress, with the same owner, job and last edit as when listed.
fn unchanged_since_listing(listed: &Case, current: &Case) -> bool {
    current.status.is_in_progress()
        && current.status == listed.status
        && current.lock_owner == listed.lock_owner
        && current.active_job_ref == listed.active_job_ref
        && current.updated_at == listed.updated_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn listed() -> Case {
        let mut case = Case::new("c1", "Doe", "https://portal.example/1")
            .with_status(CaseStatus::Acquiring);
        case.lock_owner = Some("w2".to_string());
        case.active_job_ref = Some("agent:j1".to_string());
        case.updated_at = Some(Utc::now() - Duration::hours(1));
        case
    }

    #[test]
    fn test_unchanged_since_listing() {
        let case = listed();
        assert!(unchanged_since_listing(&case, &case.clone()));

        let finished = Case {
            status: CaseStatus::Acquired,
            lock_owner: None,
            active_job_ref: None,
            ..case.clone()
        };
        assert!(!unchanged_since_listing(&case, &finished));

        let touched = Case {
            updated_at: Some(Utc::now()),
            ..case.clone()
        };
        assert!(!unchanged_since_listing(&case, &touched));

        let new_job = Case {
            active_job_ref: Some("agent:j2".to_string()),
            ..case.clone()
        };
        assert!(!unchanged_since_listing(&case, &new_job));
    }
}
