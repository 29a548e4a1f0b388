//! Relay sink that copies into a local (or mounted) directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::collector::sanitize_segment;

use super::config::DirectoryRelayConfig;
use super::types::{RelayError, RelaySink, UploadedFile};

pub struct DirectoryRelay {
    root: PathBuf,
}

impl DirectoryRelay {
    pub fn new(config: DirectoryRelayConfig) -> Self {
        Self { root: config.path }
    }
}

#[async_trait]
impl RelaySink for DirectoryRelay {
    fn name(&self) -> &str {
        "directory"
    }

    fn folder_for(&self, case_name: &str) -> String {
        self.root
            .join(sanitize_segment(case_name))
            .to_string_lossy()
            .into_owned()
    }

    async fn upload(&self, local_path: &Path, case_name: &str) -> Result<UploadedFile, RelayError> {
        let file_name = local_path
            .file_name()
            .ok_or_else(|| RelayError::NothingToUpload(local_path.to_path_buf()))?;
        let folder = PathBuf::from(self.folder_for(case_name));
        tokio::fs::create_dir_all(&folder).await?;

        let target = folder.join(file_name);
        let size_bytes = tokio::fs::copy(local_path, &target).await?;
        debug!("Copied {} to {}", local_path.display(), target.display());

        Ok(UploadedFile {
            remote_path: target.to_string_lossy().into_owned(),
            size_bytes,
        })
    }

    async fn get_or_create_shared_reference(&self, remote_path: &str) -> Result<String, RelayError> {
        if tokio::fs::metadata(remote_path).await.is_err() {
            return Err(RelayError::Api {
                status: 404,
                message: format!("{} does not exist", remote_path),
            });
        }
        Ok(remote_path.to_string())
    }
}
