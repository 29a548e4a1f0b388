//! Mock acquisition backend for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backend::{
    AcquisitionBackend, BackendError, JobRef, JobStatus, Liveness, StartRequest,
};
use crate::collector::{Artifact, CollectionSession};

/// What jobs of a mock backend do.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// `start` fails.
    FailStart(String),
    /// The job succeeds after `polls` polls and produces `files`.
    Succeed {
        polls: u32,
        files: Vec<(String, Vec<u8>)>,
    },
    /// The job fails after `polls` polls.
    FailJob { polls: u32, reason: String },
    /// The job never finishes.
    Hang,
    /// Every poll is a transient error.
    PollErrors,
    /// `start` panics.
    PanicOnStart,
}

#[derive(Debug, Clone)]
struct MockJob {
    polls: u32,
    terminal: Option<JobStatus>,
    canceled: bool,
}

#[derive(Debug, Default)]
struct BackendState {
    jobs: HashMap<String, MockJob>,
    next_id: u32,
    starts: Vec<StartRequest>,
    cancels: Vec<String>,
    discards: Vec<String>,
    collects: usize,
    running: usize,
    max_running: usize,
    liveness: HashMap<String, Liveness>,
}

impl BackendState {
    fn finish(&mut self, id: &str, status: JobStatus) {
        if let Some(job) = self.jobs.get_mut(id) {
            if job.terminal.is_none() {
                job.terminal = Some(status);
                self.running = self.running.saturating_sub(1);
            }
        }
    }
}

/// Scriptable implementation of the AcquisitionBackend trait.
///
/// Records every start, cancel, collect and discard, and tracks how many of its jobs
/// were running at the same time (share one instance across workers to
/// observe a global maximum).
///
/// # Example
///
/// ```rust,ignore
/// let agent = MockBackend::new("remote_agent").with_behavior(MockBehavior::Hang);
/// let script = MockBackend::new("scripted_browser"); // succeeds with one file
/// // ... run the orchestrator with [agent, script] ...
/// assert_eq!(agent.cancel_count().await, 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    behavior: Arc<RwLock<MockBehavior>>,
    state: Arc<RwLock<BackendState>>,
}

impl MockBackend {
    /// A backend whose jobs succeed on the first poll with one PDF.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let files = vec![(
            "evidence.pdf".to_string(),
            format!("evidence from {}", name).into_bytes(),
        )];
        Self {
            name,
            behavior: Arc::new(RwLock::new(MockBehavior::Succeed { polls: 1, files })),
            state: Arc::new(RwLock::new(BackendState::default())),
        }
    }

    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        Self {
            behavior: Arc::new(RwLock::new(behavior)),
            ..self
        }
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Override what `liveness` reports for a job id.
    pub async fn set_liveness(&self, job_id: &str, liveness: Liveness) {
        self.state
            .write()
            .await
            .liveness
            .insert(job_id.to_string(), liveness);
    }

    pub async fn starts(&self) -> Vec<StartRequest> {
        self.state.read().await.starts.clone()
    }

    pub async fn start_count(&self) -> usize {
        self.state.read().await.starts.len()
    }

    pub async fn cancel_count(&self) -> usize {
        self.state.read().await.cancels.len()
    }

    /// Job ids passed to `discard`, in order.
    pub async fn discarded(&self) -> Vec<String> {
        self.state.read().await.discards.clone()
    }

    pub async fn collect_count(&self) -> usize {
        self.state.read().await.collects
    }

    /// Most jobs of this backend that were running at once.
    pub async fn max_running(&self) -> usize {
        self.state.read().await.max_running
    }
}

#[async_trait]
impl AcquisitionBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, request: &StartRequest) -> Result<JobRef, BackendError> {
        let behavior = self.behavior.read().await.clone();
        let mut state = self.state.write().await;
        state.starts.push(request.clone());

        match behavior {
            MockBehavior::FailStart(reason) => return Err(BackendError::StartFailed(reason)),
            MockBehavior::PanicOnStart => panic!("mock backend {} exploded", self.name),
            _ => {}
        }

        state.next_id += 1;
        let id = format!("{}-{}", self.name, state.next_id);
        state.jobs.insert(
            id.clone(),
            MockJob {
                polls: 0,
                terminal: None,
                canceled: false,
            },
        );
        state.running += 1;
        state.max_running = state.max_running.max(state.running);

        Ok(JobRef::new(self.name.clone(), id))
    }

    async fn poll(&self, job: &JobRef) -> JobStatus {
        let behavior = self.behavior.read().await.clone();
        let mut state = self.state.write().await;

        let polls = match state.jobs.get_mut(&job.id) {
            Some(mock) => {
                if let Some(status) = &mock.terminal {
                    return status.clone();
                }
                mock.polls += 1;
                mock.polls
            }
            None => return JobStatus::Failed("unknown job".to_string()),
        };

        let status = match behavior {
            MockBehavior::Succeed { polls: needed, .. } if polls >= needed => {
                JobStatus::Succeeded
            }
            MockBehavior::FailJob {
                polls: needed,
                reason,
            } if polls >= needed => JobStatus::Failed(reason),
            MockBehavior::PollErrors => {
                return JobStatus::Retryable("connection reset".to_string())
            }
            _ => return JobStatus::Running,
        };
        state.finish(&job.id, status.clone());
        status
    }

    async fn cancel(&self, job: &JobRef) {
        let mut state = self.state.write().await;
        state.cancels.push(job.id.clone());
        if let Some(mock) = state.jobs.get_mut(&job.id) {
            mock.canceled = true;
        }
        state.finish(&job.id, JobStatus::Canceled);
    }

    async fn collect(
        &self,
        job: &JobRef,
        session: &mut CollectionSession,
    ) -> Result<Vec<Artifact>, BackendError> {
        let files = match &*self.behavior.read().await {
            MockBehavior::Succeed { files, .. } => files.clone(),
            _ => Vec::new(),
        };
        {
            let mut state = self.state.write().await;
            if !state.jobs.contains_key(&job.id) {
                return Err(BackendError::JobNotFound(job.to_string()));
            }
            state.collects += 1;
        }

        let mut stored = Vec::new();
        for (name, content) in files {
            let staged = session.staging_path(&name).await?;
            tokio::fs::write(&staged, &content).await?;
            if let Some(artifact) = session.ingest_staged(&staged).await? {
                stored.push(artifact);
            }
        }
        Ok(stored)
    }

    async fn discard(&self, job: &JobRef) {
        self.state.write().await.discards.push(job.id.clone());
    }

    async fn liveness(&self, job: &JobRef) -> Liveness {
        let state = self.state.read().await;
        if let Some(liveness) = state.liveness.get(&job.id) {
            return *liveness;
        }
        match state.jobs.get(&job.id) {
            Some(mock) if mock.terminal.is_none() && !mock.canceled => Liveness::Running,
            _ => Liveness::NotRunning,
        }
    }
}
