//! Record store trait and errors.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Case, CaseStatus};

/// Errors from record store operations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("Invalid record data: {0}")]
    InvalidData(String),
}

impl RecordStoreError {
    /// Timeouts, connection failures, rate limiting and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            RecordStoreError::ConnectionFailed(_) | RecordStoreError::Timeout => true,
            RecordStoreError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Typed access to the external record store.
///
/// The store offers no compare-and-swap, so [`RecordStore::try_claim`] is
/// best-effort: two workers racing on the same case can both succeed. Callers
/// rely on idempotent downstream effects instead of perfect mutual exclusion.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store name for logging.
    fn name(&self) -> &str;

    /// Cases with status Eligible and a non-empty target, in store order, capped at `limit`.
    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<Case>, RecordStoreError>;

    /// Read a single case.
    async fn get(&self, case_id: &str) -> Result<Case, RecordStoreError>;

    /// Conditionally mark the case Claimed by `worker_id`.
    ///
    /// Returns `Ok(false)` when the case is no longer claimable.
    async fn try_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError>;

    /// Re-write the lock owner so the case's last-edit time moves forward.
    ///
    /// Returns `Ok(false)` without writing when `worker_id` no longer holds the lock.
    async fn touch_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError>;

    /// Clear the lock owner. Never fails the caller; errors are logged.
    async fn release(&self, case_id: &str);

    async fn set_status(&self, case_id: &str, status: CaseStatus) -> Result<(), RecordStoreError>;

    /// Record (`Some`) or clear (`None`) the in-flight job reference.
    async fn set_active_job(
        &self,
        case_id: &str,
        job_ref: Option<&str>,
    ) -> Result<(), RecordStoreError>;

    async fn set_failure_reason(&self, case_id: &str, reason: &str)
        -> Result<(), RecordStoreError>;

    /// Record where the relayed files can be found.
    async fn set_upload_reference(
        &self,
        case_id: &str,
        reference: &str,
    ) -> Result<(), RecordStoreError>;

    /// Number of cases in `status`, counted across every result page.
    async fn count_by_status(&self, status: CaseStatus) -> Result<usize, RecordStoreError>;

    /// Every case currently Claimed or Acquiring.
    async fn list_in_progress(&self) -> Result<Vec<Case>, RecordStoreError>;
}
