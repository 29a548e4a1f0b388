//! Browser-automation agent reached over HTTP.
//!
//! The agent runs each job for minutes to hours. This adapter only creates,
//! polls and cancels jobs, then gathers the files a finished job left behind
//! from up to three places: paths the job reported, the agent's artifact API,
//! and a locally mounted output directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::collector::{Artifact, CollectionSession};

use super::activity::newest_modification;
use super::config::RemoteAgentConfig;
use super::download::{filename_from_url, stream_to_file};
use super::types::{AcquisitionBackend, BackendError, JobRef, JobStatus, Liveness, StartRequest};

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials: Option<CredentialsBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locale_hint: Option<&'a str>,
    case_name: &'a str,
}

#[derive(Debug, Serialize)]
struct CredentialsBody<'a> {
    principal: &'a str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    job_ref: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JobView {
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    reported_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactView {
    artifact_id: String,
    artifact_type: String,
    #[serde(default)]
    uri: Option<String>,
}

/// What this process has seen of a job so far.
#[derive(Debug, Clone)]
struct JobTrack {
    last_status: String,
    reported_files: Vec<String>,
    last_change: DateTime<Utc>,
}

/// Map an agent status string onto [`JobStatus`].
pub(crate) fn map_job_status(status: &str, failure_reason: Option<String>) -> JobStatus {
    match status.to_ascii_lowercase().as_str() {
        "created" | "queued" | "running" => JobStatus::Running,
        "completed" | "succeeded" => JobStatus::Succeeded,
        "failed" | "error" => JobStatus::Failed(
            failure_reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| format!("agent reported {}", status)),
        ),
        "timed_out" | "terminated" => JobStatus::TimedOut,
        "canceled" | "cancelled" => JobStatus::Canceled,
        other => {
            debug!("Unrecognized agent status '{}', treating as running", other);
            JobStatus::Running
        }
    }
}

/// Remote browser-automation agent backend.
pub struct RemoteAgentBackend {
    name: String,
    client: Client,
    config: RemoteAgentConfig,
    jobs: RwLock<HashMap<String, JobTrack>>,
}

impl RemoteAgentBackend {
    /// Create a backend named `name` (the same API serves both the local and the cloud agent).
    pub fn new(name: impl Into<String>, config: RemoteAgentConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::NotConfigured(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            client,
            config,
            jobs: RwLock::new(HashMap::new()),
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn job_url(&self, id: &str) -> String {
        format!("{}/jobs/{}", self.base_url(), urlencoding::encode(id))
    }

    fn job_output_dir(&self, id: &str) -> Option<PathBuf> {
        self.config.output_dir.as_ref().map(|dir| dir.join(id))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    /// Send and turn non-success statuses into `Api` errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }
        Ok(response)
    }

    async fn fetch_job(&self, id: &str) -> Result<JobView, BackendError> {
        let response = self
            .send(self.client.get(self.job_url(id)))
            .await
            .map_err(|e| match e {
                BackendError::Api { status: 404, .. } => BackendError::JobNotFound(id.to_string()),
                other => other,
            })?;
        response
            .json::<JobView>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn observe(&self, id: &str, view: &JobView) {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let track = jobs.entry(id.to_string()).or_insert_with(|| JobTrack {
            last_status: String::new(),
            reported_files: Vec::new(),
            last_change: now,
        });
        if track.last_status != view.status || track.reported_files != view.reported_files {
            track.last_status = view.status.clone();
            track.reported_files = view.reported_files.clone();
            track.last_change = now;
        }
    }

    /// Files the job reported, resolved locally or under the mounted output directory.
    async fn collect_reported(
        &self,
        job: &JobRef,
        session: &mut CollectionSession,
    ) -> Result<Vec<Artifact>, BackendError> {
        let reported = match self.fetch_job(&job.id).await {
            Ok(view) => view.reported_files,
            Err(e) => {
                debug!("Could not refresh job {} before collection: {}", job, e);
                self.jobs
                    .read()
                    .await
                    .get(&job.id)
                    .map(|t| t.reported_files.clone())
                    .unwrap_or_default()
            }
        };

        let mut stored = Vec::new();
        for file in reported {
            let Some(path) = self.resolve_reported(&job.id, &file).await else {
                debug!("Reported file {} not reachable locally", file);
                continue;
            };
            if let Some(artifact) = session.ingest_file(&path).await? {
                stored.push(artifact);
            }
        }
        Ok(stored)
    }

    async fn resolve_reported(&self, id: &str, file: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(file.strip_prefix("file://").unwrap_or(file));
        if direct.is_absolute() && tokio::fs::try_exists(&direct).await.unwrap_or(false) {
            return Some(direct);
        }
        let name = filename_from_url(file)?;
        let mounted = self.job_output_dir(id)?.join(name);
        if tokio::fs::try_exists(&mounted).await.unwrap_or(false) {
            Some(mounted)
        } else {
            None
        }
    }

    /// Downloads listed by the artifact API. Individual failures are logged and skipped.
    async fn collect_listed(
        &self,
        job: &JobRef,
        session: &mut CollectionSession,
    ) -> Result<Vec<Artifact>, BackendError> {
        let url = format!("{}/artifacts", self.job_url(&job.id));
        let listed = match self.send(self.client.get(url)).await {
            Ok(response) => response
                .json::<Vec<ArtifactView>>()
                .await
                .map_err(|e| BackendError::InvalidResponse(e.to_string())),
            Err(e) => Err(e),
        };
        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => {
                warn!("Artifact listing for job {} failed: {}", job, e);
                return Ok(Vec::new());
            }
        };

        let mut stored = Vec::new();
        for item in listed.into_iter().filter(|a| a.artifact_type == "download") {
            let name = item
                .uri
                .as_deref()
                .and_then(filename_from_url)
                .unwrap_or_else(|| format!("download_{}", item.artifact_id));
            if !session.accepts(&name) {
                continue;
            }

            let staged = session.staging_path(&name).await?;
            let url = format!(
                "{}/artifacts/{}/download",
                self.base_url(),
                urlencoding::encode(&item.artifact_id)
            );
            let downloaded = match self.send(self.client.get(url)).await {
                Ok(response) => stream_to_file(response, &staged, |_| {}).await,
                Err(e) => Err(e),
            };
            match downloaded {
                Ok(bytes) => {
                    debug!("Fetched artifact {} ({} bytes)", item.artifact_id, bytes);
                    if let Some(artifact) = session.ingest_staged(&staged).await? {
                        stored.push(artifact);
                    }
                }
                Err(e) => {
                    warn!("Artifact {} of job {} failed: {}", item.artifact_id, job, e);
                    let _ = tokio::fs::remove_file(&staged).await;
                }
            }
        }
        Ok(stored)
    }
}

#[async_trait]
impl AcquisitionBackend for RemoteAgentBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, request: &StartRequest) -> Result<JobRef, BackendError> {
        let body = CreateJobRequest {
            target: &request.target,
            credentials: request.credentials.as_ref().map(|c| CredentialsBody {
                principal: &c.principal,
                secret: &c.secret,
            }),
            locale_hint: self.config.locale_hint.as_deref(),
            case_name: &request.case_name,
        };

        let response = self
            .send(self.client.post(format!("{}/jobs", self.base_url())).json(&body))
            .await
            .map_err(|e| match e {
                BackendError::Api { status, message } if status < 500 && status != 429 => {
                    BackendError::StartFailed(format!("{} - {}", status, message))
                }
                other => other,
            })?;

        let created: CreateJobResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        if created.job_ref.trim().is_empty() {
            return Err(BackendError::InvalidResponse("empty job_ref".to_string()));
        }

        self.jobs.write().await.insert(
            created.job_ref.clone(),
            JobTrack {
                last_status: "created".to_string(),
                reported_files: Vec::new(),
                last_change: Utc::now(),
            },
        );

        info!("{} started job {} for case {}", self.name, created.job_ref, request.case_id);
        Ok(JobRef::new(&self.name, created.job_ref))
    }

    async fn poll(&self, job: &JobRef) -> JobStatus {
        match self.fetch_job(&job.id).await {
            Ok(view) => {
                self.observe(&job.id, &view).await;
                map_job_status(&view.status, view.failure_reason)
            }
            Err(BackendError::JobNotFound(_)) => {
                JobStatus::Failed("job not found on agent".to_string())
            }
            Err(e) => JobStatus::Retryable(e.to_string()),
        }
    }

    async fn cancel(&self, job: &JobRef) {
        let url = format!("{}/cancel", self.job_url(&job.id));
        match self.send(self.client.post(url)).await {
            Ok(_) => info!("Requested cancel of {}", job),
            Err(e) => warn!("Cancel of {} failed: {}", job, e),
        }
    }

    async fn collect(
        &self,
        job: &JobRef,
        session: &mut CollectionSession,
    ) -> Result<Vec<Artifact>, BackendError> {
        let mut stored = self.collect_reported(job, session).await?;
        stored.extend(self.collect_listed(job, session).await?);
        if let Some(dir) = self.job_output_dir(&job.id) {
            stored.extend(session.ingest_directory(&dir).await?);
        }

        self.jobs.write().await.remove(&job.id);
        info!("Collected {} new files from {}", stored.len(), job);
        Ok(stored)
    }

    async fn discard(&self, job: &JobRef) {
        self.jobs.write().await.remove(&job.id);
    }

    async fn last_activity(&self, job: &JobRef) -> Option<DateTime<Utc>> {
        let observed = self.jobs.read().await.get(&job.id).map(|t| t.last_change);
        let written = match self.job_output_dir(&job.id) {
            Some(dir) => newest_modification(&dir).await,
            None => None,
        };
        observed.max(written)
    }

    async fn liveness(&self, job: &JobRef) -> Liveness {
        match self.fetch_job(&job.id).await {
            Ok(view) => match map_job_status(&view.status, view.failure_reason) {
                JobStatus::Running => Liveness::Running,
                _ => Liveness::NotRunning,
            },
            Err(BackendError::JobNotFound(_)) => Liveness::NotRunning,
            Err(e) => {
                debug!("Liveness of {} unknown: {}", job, e);
                Liveness::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(output_dir: Option<PathBuf>) -> RemoteAgentBackend {
        RemoteAgentBackend::new(
            "remote_agent",
            RemoteAgentConfig {
                api_base: "http://localhost:8000/api/v1/".to_string(),
                api_key: Some("k".to_string()),
                timeout_secs: 5,
                locale_hint: None,
                output_dir,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_job_status("queued", None), JobStatus::Running);
        assert_eq!(map_job_status("Completed", None), JobStatus::Succeeded);
        assert_eq!(
            map_job_status("failed", Some("login rejected".into())),
            JobStatus::Failed("login rejected".into())
        );
        assert_eq!(
            map_job_status("error", None),
            JobStatus::Failed("agent reported error".into())
        );
        assert_eq!(map_job_status("terminated", None), JobStatus::TimedOut);
        assert_eq!(map_job_status("cancelled", None), JobStatus::Canceled);
        assert_eq!(map_job_status("thinking", None), JobStatus::Running);
    }

    #[test]
    fn test_urls() {
        let backend = backend(None);
        assert_eq!(backend.job_url("t 1"), "http://localhost:8000/api/v1/jobs/t%201");
        assert_eq!(backend.name(), "remote_agent");
    }

    #[test]
    fn test_create_request_serialization() {
        let body = CreateJobRequest {
            target: "https://portal.example/x",
            credentials: Some(CredentialsBody {
                principal: "jdoe",
                secret: "pw",
            }),
            locale_hint: None,
            case_name: "Doe",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["credentials"]["principal"], "jdoe");
        assert!(json.get("locale_hint").is_none());
    }

    #[tokio::test]
    async fn test_activity_tracks_status_changes() {
        let backend = backend(None);
        let job = JobRef::new("remote_agent", "j1");
        assert!(backend.last_activity(&job).await.is_none());

        let view = JobView {
            status: "running".into(),
            failure_reason: None,
            reported_files: vec![],
        };
        backend.observe("j1", &view).await;
        let first = backend.last_activity(&job).await.unwrap();

        backend.observe("j1", &view).await;
        assert_eq!(backend.last_activity(&job).await.unwrap(), first);

        backend.discard(&job).await;
        assert!(backend.last_activity(&job).await.is_none());
        assert!(backend.jobs.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reported_under_mount() {
        let temp = tempfile::TempDir::new().unwrap();
        let backend = backend(Some(temp.path().to_path_buf()));
        tokio::fs::create_dir_all(temp.path().join("j1")).await.unwrap();
        tokio::fs::write(temp.path().join("j1/doc.pdf"), b"x").await.unwrap();

        let resolved = backend
            .resolve_reported("j1", "/agent/downloads/j1/doc.pdf")
            .await
            .unwrap();
        assert_eq!(resolved, temp.path().join("j1/doc.pdf"));
        assert!(backend.resolve_reported("j1", "missing.pdf").await.is_none());
    }
}
