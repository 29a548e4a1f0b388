//! Mock relay sink for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::collector::sanitize_segment;
use crate::relay::{RelayError, RelaySink, UploadedFile};

/// A recorded upload for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub local_path: PathBuf,
    pub case_name: String,
    pub remote_path: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Default)]
struct RelayState {
    uploads: Vec<RecordedUpload>,
    links: HashMap<String, String>,
    link_requests: usize,
    fail_uploads: bool,
    upload_delay: Duration,
}

/// In-memory implementation of the RelaySink trait.
///
/// Keeps the uploaded bytes so tests can check what reached the durable store.
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    state: Arc<RwLock<RelayState>>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload fail with a 500.
    pub async fn set_fail_uploads(&self, fail: bool) {
        self.state.write().await.fail_uploads = fail;
    }

    /// Hold every upload for `delay` before it completes.
    pub async fn set_upload_delay(&self, delay: Duration) {
        self.state.write().await.upload_delay = delay;
    }

    pub async fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.read().await.uploads.clone()
    }

    /// Shared links created so far.
    pub async fn link_count(&self) -> usize {
        self.state.read().await.links.len()
    }

    pub async fn link_requests(&self) -> usize {
        self.state.read().await.link_requests
    }
}

#[async_trait]
impl RelaySink for MockRelay {
    fn name(&self) -> &str {
        "mock"
    }

    fn folder_for(&self, case_name: &str) -> String {
        format!("/evidence/{}", sanitize_segment(case_name))
    }

    async fn upload(&self, local_path: &Path, case_name: &str) -> Result<UploadedFile, RelayError> {
        let (fail, delay) = {
            let state = self.state.read().await;
            (state.fail_uploads, state.upload_delay)
        };
        if fail {
            return Err(RelayError::Api {
                status: 500,
                message: "injected upload failure".to_string(),
            });
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let content = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote_path = format!("{}/{}", self.folder_for(case_name), file_name);
        let size_bytes = content.len() as u64;

        self.state.write().await.uploads.push(RecordedUpload {
            local_path: local_path.to_path_buf(),
            case_name: case_name.to_string(),
            remote_path: remote_path.clone(),
            content,
        });

        Ok(UploadedFile {
            remote_path,
            size_bytes,
        })
    }

    async fn get_or_create_shared_reference(&self, remote_path: &str) -> Result<String, RelayError> {
        let mut state = self.state.write().await;
        state.link_requests += 1;
        let link = state
            .links
            .entry(remote_path.to_string())
            .or_insert_with(|| format!("https://share.example{}", remote_path.replace(' ', "%20")));
        Ok(link.clone())
    }
}
