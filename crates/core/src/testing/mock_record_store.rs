//! Mock record store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::record_store::{Case, CaseStatus, RecordStore, RecordStoreError};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchEligible,
    TryClaim,
    TouchClaim,
    /// `set_status` to the given status.
    SetStatus(CaseStatus),
    SetActiveJob,
    SetFailureReason,
    SetUploadReference,
    ListInProgress,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Store order.
    cases: Vec<Case>,
    releases: HashMap<String, usize>,
    touches: HashMap<String, usize>,
    history: HashMap<String, Vec<CaseStatus>>,
    failing: HashSet<StoreOp>,
}

impl StoreState {
    fn case_mut(&mut self, case_id: &str) -> Result<&mut Case, RecordStoreError> {
        self.cases
            .iter_mut()
            .find(|c| c.id == case_id)
            .ok_or_else(|| RecordStoreError::CaseNotFound(case_id.to_string()))
    }

    fn check(&self, op: StoreOp) -> Result<(), RecordStoreError> {
        if self.failing.contains(&op) {
            return Err(RecordStoreError::Api {
                status: 503,
                message: format!("injected failure for {:?}", op),
            });
        }
        Ok(())
    }
}

/// In-memory implementation of the RecordStore trait.
///
/// Every write stamps `updated_at`, like a real store's last-edit time.
///
/// # Example
///
/// ```rust,ignore
/// let store = MockRecordStore::new();
/// store.insert(fixtures::case("c1", "Jane Doe")).await;
///
/// store.fail_on(StoreOp::SetStatus(CaseStatus::Acquired)).await;
/// // ... run the orchestrator ...
/// assert_eq!(store.case("c1").await.unwrap().status, CaseStatus::Failed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRecordStore {
    state: Arc<RwLock<StoreState>>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a case at the end of the store order. Keeps a preset `updated_at`.
    pub async fn insert(&self, mut case: Case) {
        if case.updated_at.is_none() {
            case.updated_at = Some(Utc::now());
        }
        let mut state = self.state.write().await;
        state.history.insert(case.id.clone(), vec![case.status]);
        state.cases.retain(|c| c.id != case.id);
        state.cases.push(case);
    }

    pub async fn case(&self, case_id: &str) -> Option<Case> {
        self.state
            .read()
            .await
            .cases
            .iter()
            .find(|c| c.id == case_id)
            .cloned()
    }

    pub async fn cases(&self) -> Vec<Case> {
        self.state.read().await.cases.clone()
    }

    /// How many times `release` was called for the case.
    pub async fn release_count(&self, case_id: &str) -> usize {
        self.state
            .read()
            .await
            .releases
            .get(case_id)
            .copied()
            .unwrap_or(0)
    }

    /// How many times `touch_claim` refreshed the case.
    pub async fn touch_count(&self, case_id: &str) -> usize {
        self.state
            .read()
            .await
            .touches
            .get(case_id)
            .copied()
            .unwrap_or(0)
    }

    /// Every status the case has been in, starting with the inserted one.
    pub async fn status_history(&self, case_id: &str) -> Vec<CaseStatus> {
        self.state
            .read()
            .await
            .history
            .get(case_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make `op` fail until [`MockRecordStore::clear_failures`].
    pub async fn fail_on(&self, op: StoreOp) {
        self.state.write().await.failing.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.state.write().await.failing.clear();
    }

    /// Overwrite a case's fields directly, bypassing failure injection.
    pub async fn update<F: FnOnce(&mut Case)>(&self, case_id: &str, f: F) {
        let mut state = self.state.write().await;
        if let Ok(case) = state.case_mut(case_id) {
            f(case);
        }
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<Case>, RecordStoreError> {
        let state = self.state.read().await;
        state.check(StoreOp::FetchEligible)?;
        Ok(state
            .cases
            .iter()
            .filter(|c| c.status == CaseStatus::Eligible && c.has_target())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, case_id: &str) -> Result<Case, RecordStoreError> {
        self.case(case_id)
            .await
            .ok_or_else(|| RecordStoreError::CaseNotFound(case_id.to_string()))
    }

    async fn try_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOp::TryClaim)?;
        let case = state.case_mut(case_id)?;
        if case.status != CaseStatus::Eligible || case.lock_owner.is_some() {
            return Ok(false);
        }
        case.status = CaseStatus::Claimed;
        case.lock_owner = Some(worker_id.to_string());
        case.updated_at = Some(Utc::now());
        state
            .history
            .entry(case_id.to_string())
            .or_default()
            .push(CaseStatus::Claimed);
        Ok(true)
    }

    async fn touch_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOp::TouchClaim)?;
        let case = state.case_mut(case_id)?;
        if case.lock_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        case.updated_at = Some(Utc::now());
        *state.touches.entry(case_id.to_string()).or_default() += 1;
        Ok(true)
    }

    async fn release(&self, case_id: &str) {
        let mut state = self.state.write().await;
        *state.releases.entry(case_id.to_string()).or_default() += 1;
        if let Ok(case) = state.case_mut(case_id) {
            case.lock_owner = None;
            case.updated_at = Some(Utc::now());
        }
    }

    async fn set_status(&self, case_id: &str, status: CaseStatus) -> Result<(), RecordStoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOp::SetStatus(status))?;
        let case = state.case_mut(case_id)?;
        case.status = status;
        case.updated_at = Some(Utc::now());
        state
            .history
            .entry(case_id.to_string())
            .or_default()
            .push(status);
        Ok(())
    }

    async fn set_active_job(
        &self,
        case_id: &str,
        job_ref: Option<&str>,
    ) -> Result<(), RecordStoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOp::SetActiveJob)?;
        let case = state.case_mut(case_id)?;
        case.active_job_ref = job_ref.filter(|j| !j.is_empty()).map(str::to_string);
        case.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn set_failure_reason(
        &self,
        case_id: &str,
        reason: &str,
    ) -> Result<(), RecordStoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOp::SetFailureReason)?;
        let case = state.case_mut(case_id)?;
        case.failure_reason = Some(reason.to_string()).filter(|r| !r.is_empty());
        case.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn set_upload_reference(
        &self,
        case_id: &str,
        reference: &str,
    ) -> Result<(), RecordStoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOp::SetUploadReference)?;
        let case = state.case_mut(case_id)?;
        case.upload_reference = Some(reference.to_string());
        case.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn count_by_status(&self, status: CaseStatus) -> Result<usize, RecordStoreError> {
        Ok(self
            .state
            .read()
            .await
            .cases
            .iter()
            .filter(|c| c.status == status)
            .count())
    }

    async fn list_in_progress(&self) -> Result<Vec<Case>, RecordStoreError> {
        let state = self.state.read().await;
        state.check(StoreOp::ListInProgress)?;
        Ok(state
            .cases
            .iter()
            .filter(|c| c.status.is_in_progress())
            .cloned()
            .collect())
    }
}
