//! Relay sink contract and errors.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Nothing to upload in {0}")]
    NothingToUpload(PathBuf),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Relay not configured: {0}")]
    NotConfigured(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Timeouts, connection failures, rate limiting and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::ConnectionFailed(_) | RelayError::Timeout => true,
            RelayError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::Timeout
        } else if e.is_connect() {
            RelayError::ConnectionFailed(e.to_string())
        } else {
            RelayError::InvalidResponse(e.to_string())
        }
    }
}

/// A file that reached the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub remote_path: String,
    pub size_bytes: u64,
}

/// Durable file store the collected artifacts are relayed to.
#[async_trait]
pub trait RelaySink: Send + Sync {
    fn name(&self) -> &str;

    /// Remote folder holding a case's files.
    fn folder_for(&self, case_name: &str) -> String;

    /// Upload one file into the case folder, replacing any file of the same name.
    async fn upload(&self, local_path: &Path, case_name: &str) -> Result<UploadedFile, RelayError>;

    /// Shareable reference to `remote_path`. Returns the existing one when present.
    async fn get_or_create_shared_reference(&self, remote_path: &str) -> Result<String, RelayError>;
}
