//! Local browser script run as a child process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::collector::{Artifact, CollectionSession};

use super::activity::newest_modification;
use super::config::ScriptedBrowserConfig;
use super::types::{AcquisitionBackend, BackendError, JobRef, JobStatus, Liveness, StartRequest};

const NAME: &str = "scripted_browser";

/// How long a killed script gets to exit before it is given up on.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

struct ScriptJob {
    child: Mutex<Child>,
    output_dir: PathBuf,
    canceled: AtomicBool,
}

/// Runs the configured script once per attempt.
pub struct ScriptedBrowserBackend {
    config: ScriptedBrowserConfig,
    worker_id: String,
    jobs: RwLock<HashMap<String, Arc<ScriptJob>>>,
}

impl ScriptedBrowserBackend {
    pub fn new(config: ScriptedBrowserConfig, worker_id: impl Into<String>) -> Self {
        Self {
            config,
            worker_id: worker_id.into(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn owns(&self, job: &JobRef) -> bool {
        job.local_owner() == Some(self.worker_id.as_str())
    }

    async fn job(&self, id: &str) -> Option<Arc<ScriptJob>> {
        self.jobs.read().await.get(id).cloned()
    }
}

#[async_trait]
impl AcquisitionBackend for ScriptedBrowserBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&self, request: &StartRequest) -> Result<JobRef, BackendError> {
        let id = JobRef::local_id(&self.worker_id);
        let output_dir = self.config.work_dir.join(&id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(&request.target)
            .arg(&output_dir)
            .arg(&request.case_name)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(credentials) = &request.credentials {
            command
                .env("EVIDENCE_PRINCIPAL", &credentials.principal)
                .env("EVIDENCE_SECRET", &credentials.secret);
        }

        let child = command.spawn().map_err(|e| {
            BackendError::StartFailed(format!("could not run {}: {}", self.config.command, e))
        })?;

        self.jobs.write().await.insert(
            id.clone(),
            Arc::new(ScriptJob {
                child: Mutex::new(child),
                output_dir,
                canceled: AtomicBool::new(false),
            }),
        );

        info!("Started browser script {} for case {}", id, request.case_id);
        Ok(JobRef::new(NAME, id))
    }

    async fn poll(&self, job: &JobRef) -> JobStatus {
        let Some(script) = self.job(&job.id).await else {
            return JobStatus::Failed("unknown script job".to_string());
        };
        if script.canceled.load(Ordering::SeqCst) {
            return JobStatus::Canceled;
        }

        let mut child = script.child.lock().await;
        match child.try_wait() {
            Ok(None) => JobStatus::Running,
            Ok(Some(status)) if status.success() => JobStatus::Succeeded,
            Ok(Some(status)) => JobStatus::Failed(format!("script exited with {}", status)),
            Err(e) => JobStatus::Retryable(e.to_string()),
        }
    }

    async fn cancel(&self, job: &JobRef) {
        let Some(script) = self.job(&job.id).await else {
            warn!("Cancel requested for unknown script job {}", job);
            return;
        };
        script.canceled.store(true, Ordering::SeqCst);
        let mut child = script.child.lock().await;
        stop_child(&mut child, job).await;
    }

    async fn collect(
        &self,
        job: &JobRef,
        session: &mut CollectionSession,
    ) -> Result<Vec<Artifact>, BackendError> {
        let Some(script) = self.jobs.write().await.remove(&job.id) else {
            return Err(BackendError::JobNotFound(job.to_string()));
        };

        let stored = session.ingest_directory(&script.output_dir).await;
        remove_output(&script.output_dir).await;
        Ok(stored?)
    }

    async fn discard(&self, job: &JobRef) {
        let Some(script) = self.jobs.write().await.remove(&job.id) else {
            return;
        };
        {
            let mut child = script.child.lock().await;
            stop_child(&mut child, job).await;
        }
        remove_output(&script.output_dir).await;
    }

    async fn last_activity(&self, job: &JobRef) -> Option<DateTime<Utc>> {
        let script = self.job(&job.id).await?;
        newest_modification(&script.output_dir).await
    }

    async fn liveness(&self, job: &JobRef) -> Liveness {
        if !self.owns(job) {
            return Liveness::Unknown;
        }
        match self.poll(job).await {
            JobStatus::Running => Liveness::Running,
            JobStatus::Retryable(_) => Liveness::Unknown,
            _ => Liveness::NotRunning,
        }
    }
}

/// Kill the script if it is still running and wait for it to exit.
async fn stop_child(child: &mut Child, job: &JobRef) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill script {}: {}", job, e);
        return;
    }
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!("Script {} stopped with {}", job, status),
        Ok(Err(e)) => warn!("Failed to wait for script {}: {}", job, e),
        Err(_) => warn!("Script {} did not exit after kill", job),
    }
}

async fn remove_output(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove script output {}: {}", dir.display(), e);
        }
    }
}
