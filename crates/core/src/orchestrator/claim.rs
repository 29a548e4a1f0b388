//! Scoped ownership of a claimed case.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::record_store::RecordStore;

/// Holds a claim until released.
///
/// [`ClaimGuard::release`] clears the lock owner exactly once. A guard dropped
/// without being released (the owning task was aborted) clears the job
/// reference and the lock from a detached task instead.
///
/// With a heartbeat the claim is touched periodically so sweeps in other
/// processes keep seeing it as fresh while no job reference is recorded.
pub struct ClaimGuard {
    store: Arc<dyn RecordStore>,
    case_id: String,
    released: bool,
    heartbeat: Option<JoinHandle<()>>,
}

impl ClaimGuard {
    pub fn new(store: Arc<dyn RecordStore>, case_id: impl Into<String>) -> Self {
        Self {
            store,
            case_id: case_id.into(),
            released: false,
            heartbeat: None,
        }
    }

    /// Touch the claim every `interval` until the guard is released or dropped.
    /// Stops early once `worker_id` no longer holds the lock.
    pub fn with_heartbeat(mut self, worker_id: impl Into<String>, interval: Duration) -> Self {
        let store = Arc::clone(&self.store);
        let case_id = self.case_id.clone();
        let worker_id = worker_id.into();

        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.touch_claim(&case_id, &worker_id).await {
                    Ok(true) => debug!("Refreshed claim on case {}", case_id),
                    Ok(false) => {
                        warn!("Case {} is no longer claimed by {}", case_id, worker_id);
                        break;
                    }
                    Err(e) => warn!("Failed to refresh claim on case {}: {}", case_id, e),
                }
            }
        }));
        self
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
            // No touch may follow the release.
            let _ = heartbeat.await;
        }
        self.store.release(&self.case_id).await;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if self.released {
            return;
        }

        warn!("Claim on case {} dropped without release", self.case_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let case_id = std::mem::take(&mut self.case_id);
        handle.spawn(async move {
            if let Err(e) = store.set_active_job(&case_id, None).await {
                warn!("Failed to clear job reference of case {}: {}", case_id, e);
            }
            store.release(&case_id).await;
        });
    }
}
