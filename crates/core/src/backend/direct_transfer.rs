//! Direct HTTP download of the acquisition target.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Client, Url};
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::collector::{Artifact, CollectionSession};
use crate::text::Credentials;

use super::config::DirectTransferConfig;
use super::download::{filename_from_disposition, filename_from_url, stream_to_file};
use super::types::{AcquisitionBackend, BackendError, JobRef, JobStatus, Liveness, StartRequest};

const NAME: &str = "direct_transfer";

#[derive(Debug, Clone, PartialEq, Eq)]
enum TransferOutcome {
    Completed,
    Failed(String),
    Canceled,
}

/// State shared between the transfer task and the backend.
struct TransferState {
    /// Unix milliseconds of the last received chunk (or of the start).
    last_chunk_ms: AtomicI64,
    outcome: RwLock<Option<TransferOutcome>>,
}

struct TransferJob {
    dir: PathBuf,
    state: Arc<TransferState>,
    abort: AbortHandle,
}

/// Downloads the target with a single streamed GET.
pub struct DirectTransferBackend {
    client: Client,
    config: DirectTransferConfig,
    worker_id: String,
    jobs: RwLock<HashMap<String, TransferJob>>,
}

impl DirectTransferBackend {
    pub fn new(config: DirectTransferConfig, worker_id: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| BackendError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            config,
            worker_id: worker_id.into(),
            jobs: RwLock::new(HashMap::new()),
        })
    }

    fn owns(&self, job: &JobRef) -> bool {
        job.local_owner() == Some(self.worker_id.as_str())
    }

    async fn run_transfer(
        client: Client,
        url: Url,
        credentials: Option<Credentials>,
        dir: PathBuf,
        state: Arc<TransferState>,
    ) -> Result<(), BackendError> {
        let mut request = client.get(url.clone());
        if let Some(c) = &credentials {
            request = request.basic_auth(&c.principal, Some(&c.secret));
        }

        let response = request.send().await.map_err(BackendError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(url.as_str()))
            .unwrap_or_else(|| "download.bin".to_string());
        let name = crate::collector::sanitize_segment(&name);
        let name = if name.is_empty() {
            "download.bin".to_string()
        } else {
            name
        };

        let path = dir.join(name);
        let bytes = stream_to_file(response, &path, |_| {
            state
                .last_chunk_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        })
        .await?;

        debug!("Transfer wrote {} bytes to {}", bytes, path.display());
        Ok(())
    }
}

#[async_trait]
impl AcquisitionBackend for DirectTransferBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&self, request: &StartRequest) -> Result<JobRef, BackendError> {
        let url = Url::parse(&request.target)
            .map_err(|e| BackendError::StartFailed(format!("invalid target: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BackendError::StartFailed(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let id = JobRef::local_id(&self.worker_id);
        let dir = self.config.work_dir.join(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let state = Arc::new(TransferState {
            last_chunk_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            outcome: RwLock::new(None),
        });

        let task_state = state.clone();
        let client = self.client.clone();
        let credentials = request.credentials.clone();
        let task_dir = dir.clone();
        let handle = tokio::spawn(async move {
            let result =
                Self::run_transfer(client, url, credentials, task_dir, task_state.clone()).await;
            let outcome = match result {
                Ok(()) => TransferOutcome::Completed,
                Err(e) => TransferOutcome::Failed(e.to_string()),
            };
            *task_state.outcome.write().await = Some(outcome);
        });

        self.jobs.write().await.insert(
            id.clone(),
            TransferJob {
                dir,
                state,
                abort: handle.abort_handle(),
            },
        );

        info!("Started direct transfer {} for case {}", id, request.case_id);
        Ok(JobRef::new(NAME, id))
    }

    async fn poll(&self, job: &JobRef) -> JobStatus {
        let jobs = self.jobs.read().await;
        let Some(transfer) = jobs.get(&job.id) else {
            return JobStatus::Failed("unknown transfer job".to_string());
        };
        let outcome = transfer.state.outcome.read().await.clone();
        match outcome {
            None => JobStatus::Running,
            Some(TransferOutcome::Completed) => JobStatus::Succeeded,
            Some(TransferOutcome::Failed(reason)) => JobStatus::Failed(reason),
            Some(TransferOutcome::Canceled) => JobStatus::Canceled,
        }
    }

    async fn cancel(&self, job: &JobRef) {
        let jobs = self.jobs.read().await;
        match jobs.get(&job.id) {
            Some(transfer) => {
                transfer.abort.abort();
                let mut outcome = transfer.state.outcome.write().await;
                if outcome.is_none() {
                    *outcome = Some(TransferOutcome::Canceled);
                }
                info!("Canceled transfer {}", job);
            }
            None => warn!("Cancel requested for unknown transfer {}", job),
        }
    }

    async fn collect(
        &self,
        job: &JobRef,
        session: &mut CollectionSession,
    ) -> Result<Vec<Artifact>, BackendError> {
        let Some(transfer) = self.jobs.write().await.remove(&job.id) else {
            return Err(BackendError::JobNotFound(job.to_string()));
        };

        let stored = session.ingest_directory(&transfer.dir).await;
        remove_transfer_dir(&transfer.dir).await;
        Ok(stored?)
    }

    async fn discard(&self, job: &JobRef) {
        let Some(transfer) = self.jobs.write().await.remove(&job.id) else {
            return;
        };
        transfer.abort.abort();
        remove_transfer_dir(&transfer.dir).await;
        debug!("Discarded transfer {}", job);
    }

    async fn last_activity(&self, job: &JobRef) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.read().await;
        let ms = jobs.get(&job.id)?.state.last_chunk_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms).single()
    }

    async fn liveness(&self, job: &JobRef) -> Liveness {
        if !self.owns(job) {
            return Liveness::Unknown;
        }
        let jobs = self.jobs.read().await;
        match jobs.get(&job.id) {
            Some(transfer) if transfer.state.outcome.read().await.is_none() => Liveness::Running,
            _ => Liveness::NotRunning,
        }
    }
}

async fn remove_transfer_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove transfer dir {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> DirectTransferBackend {
        let config = DirectTransferConfig {
            work_dir: dir.path().to_path_buf(),
            ..DirectTransferConfig::default()
        };
        DirectTransferBackend::new(config, "worker-a").unwrap()
    }

    fn request(target: &str) -> StartRequest {
        StartRequest {
            case_id: "c1".to_string(),
            case_name: "Doe".to_string(),
            target: target.to_string(),
            credentials: None,
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_targets() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        assert!(matches!(
            backend.start(&request("not a url")).await,
            Err(BackendError::StartFailed(_))
        ));
        assert!(matches!(
            backend.start(&request("ftp://host/file")).await,
            Err(BackendError::StartFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_liveness_of_foreign_and_unknown_jobs() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        let foreign = JobRef::new(NAME, JobRef::local_id("worker-b"));
        assert_eq!(backend.liveness(&foreign).await, Liveness::Unknown);

        // A worker whose id extends ours is still someone else.
        let lookalike = JobRef::new(NAME, JobRef::local_id("worker-a-2"));
        assert_eq!(backend.liveness(&lookalike).await, Liveness::Unknown);

        let unknown = JobRef::new(NAME, JobRef::local_id("worker-a"));
        assert_eq!(backend.liveness(&unknown).await, Liveness::NotRunning);
        assert!(matches!(backend.poll(&unknown).await, JobStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_target_fails() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        let job = backend
            .start(&request("http://127.0.0.1:9/evidence.zip"))
            .await
            .unwrap();
        assert_eq!(job.local_owner(), Some("worker-a"));

        let mut status = backend.poll(&job).await;
        for _ in 0..100 {
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            status = backend.poll(&job).await;
        }
        assert!(matches!(status, JobStatus::Failed(_)));
        assert_eq!(backend.liveness(&job).await, Liveness::NotRunning);

        assert!(temp.path().join(&job.id).exists());
        backend.discard(&job).await;
        assert!(!temp.path().join(&job.id).exists());
        assert!(backend.jobs.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_marks_canceled() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        // Canceled before the transfer task gets to run.
        let job = backend
            .start(&request("http://10.255.255.1/evidence.zip"))
            .await
            .unwrap();
        backend.cancel(&job).await;
        assert_eq!(backend.poll(&job).await, JobStatus::Canceled);

        backend.discard(&job).await;
        assert!(backend.jobs.read().await.is_empty());
        assert!(backend.last_activity(&job).await.is_none());
    }
}
