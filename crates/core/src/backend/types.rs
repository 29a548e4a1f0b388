//! Backend contract types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::collector::{Artifact, CollectionSession, CollectorError};
use crate::text::Credentials;

/// Errors from backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Start rejected: {0}")]
    StartFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Collection failed: {0}")]
    Collection(#[from] CollectorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    /// Timeouts, connection failures, rate limiting and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::ConnectionFailed(_) | BackendError::Timeout => true,
            BackendError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_connect() {
            BackendError::ConnectionFailed(e.to_string())
        } else {
            BackendError::InvalidResponse(e.to_string())
        }
    }
}

/// `-` plus a hyphenated UUID.
const LOCAL_SUFFIX_LEN: usize = 37;

/// Reference to a job owned by one backend, persisted as `backend:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub backend: String,
    pub id: String,
}

impl JobRef {
    pub fn new(backend: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            id: id.into(),
        }
    }

    /// Fresh id for a job run inside this process: `{worker_id}-{uuid}`.
    pub fn local_id(worker_id: &str) -> String {
        format!("{}-{}", worker_id, uuid::Uuid::new_v4())
    }

    /// Worker that started a local job, read from an id made by [`JobRef::local_id`].
    pub fn local_owner(&self) -> Option<&str> {
        let split = self.id.len().checked_sub(LOCAL_SUFFIX_LEN)?;
        if !self.id.is_char_boundary(split) {
            return None;
        }
        let (owner, suffix) = self.id.split_at(split);
        uuid::Uuid::parse_str(suffix.strip_prefix('-')?).ok()?;
        Some(owner).filter(|o| !o.is_empty())
    }

    /// Parse a persisted reference. Both halves must be non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (backend, id) = value.trim().split_once(':')?;
        if backend.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(backend, id))
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.id)
    }
}

/// Status of a backend job as seen by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
    TimedOut,
    Canceled,
    /// The poll itself failed transiently; the job state is unknown.
    Retryable(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed(_) | JobStatus::TimedOut | JobStatus::Canceled
        )
    }
}

/// Whether a job is actually still running, as far as the backend can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    NotRunning,
    /// The backend cannot answer (unreachable, or the job belongs to another worker process).
    Unknown,
}

/// What a backend needs to start a job.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub case_id: String,
    pub case_name: String,
    pub target: String,
    pub credentials: Option<Credentials>,
}

/// One concrete acquisition mechanism.
///
/// `start` returns quickly; the work itself runs elsewhere until `poll` reports
/// a terminal status. `cancel` is fire-and-forget. `discard` ends the job's
/// local bookkeeping.
#[async_trait]
pub trait AcquisitionBackend: Send + Sync {
    /// Backend name; also the prefix of its persisted job references.
    fn name(&self) -> &str;

    async fn start(&self, request: &StartRequest) -> Result<JobRef, BackendError>;

    /// Safe to call repeatedly. Transport failures come back as `Retryable`.
    async fn poll(&self, job: &JobRef) -> JobStatus;

    /// Best effort; failures are logged.
    async fn cancel(&self, job: &JobRef);

    /// Pull everything the job produced into the session. Returns what was newly stored.
    async fn collect(
        &self,
        job: &JobRef,
        session: &mut CollectionSession,
    ) -> Result<Vec<Artifact>, BackendError>;

    /// Forget the job and remove anything it left in this process. Called at
    /// the end of every attempt, whether or not the job was collected.
    async fn discard(&self, _job: &JobRef) {}

    /// Last observed sign of progress, if the backend can tell.
    async fn last_activity(&self, _job: &JobRef) -> Option<DateTime<Utc>> {
        None
    }

    async fn liveness(&self, job: &JobRef) -> Liveness;
}
