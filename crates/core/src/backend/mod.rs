//! Acquisition backends.
//!
//! Each backend wraps one way of fetching a case's files behind the
//! [`AcquisitionBackend`] contract (`start / poll / cancel / collect`). The
//! orchestrator tries them in the configured chain order.

mod activity;
mod config;
mod direct_transfer;
mod download;
mod remote_agent;
mod scripted_browser;
mod types;

use std::sync::Arc;

pub use activity::newest_modification;
pub use config::{
    BackendKind, BackendsConfig, DirectTransferConfig, RemoteAgentConfig, ScriptedBrowserConfig,
};
pub use direct_transfer::DirectTransferBackend;
pub use download::{filename_from_disposition, filename_from_url, stream_to_file};
pub use remote_agent::RemoteAgentBackend;
pub use scripted_browser::ScriptedBrowserBackend;
pub use types::{AcquisitionBackend, BackendError, JobRef, JobStatus, Liveness, StartRequest};

/// Build the backend chain in configured order.
pub fn build_backends(
    config: &BackendsConfig,
    worker_id: &str,
) -> Result<Vec<Arc<dyn AcquisitionBackend>>, BackendError> {
    let missing = |kind: BackendKind| {
        BackendError::NotConfigured(format!("[backends.{}] section is missing", kind))
    };

    let mut backends: Vec<Arc<dyn AcquisitionBackend>> = Vec::with_capacity(config.chain.len());
    for kind in &config.chain {
        let backend: Arc<dyn AcquisitionBackend> = match kind {
            BackendKind::RemoteAgent => {
                let section = config.remote_agent.clone().ok_or_else(|| missing(*kind))?;
                Arc::new(RemoteAgentBackend::new(kind.as_str(), section)?)
            }
            BackendKind::CloudAgent => {
                let section = config.cloud_agent.clone().ok_or_else(|| missing(*kind))?;
                Arc::new(RemoteAgentBackend::new(kind.as_str(), section)?)
            }
            BackendKind::DirectTransfer => {
                let section = config.direct_transfer.clone().ok_or_else(|| missing(*kind))?;
                Arc::new(DirectTransferBackend::new(section, worker_id)?)
            }
            BackendKind::ScriptedBrowser => {
                let section = config.scripted_browser.clone().ok_or_else(|| missing(*kind))?;
                Arc::new(ScriptedBrowserBackend::new(section, worker_id))
            }
        };
        backends.push(backend);
    }
    Ok(backends)
}
