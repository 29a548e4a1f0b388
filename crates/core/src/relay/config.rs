//! Relay configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Available relay sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayBackend {
    #[default]
    Dropbox,
    Directory,
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub backend: RelayBackend,
    /// Remove each local file once its upload succeeded.
    #[serde(default = "default_delete_after_upload")]
    pub delete_after_upload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropbox: Option<DropboxConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<DirectoryRelayConfig>,
}

/// Dropbox API settings.
///
/// Either a long-lived `access_token`, or `app_key` + `app_secret` +
/// `refresh_token` for short-lived tokens renewed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropboxConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,
    /// Team member to act as (`Dropbox-API-Select-User`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    /// Folder under which one folder per case is created.
    #[serde(default = "default_root_folder")]
    pub root_folder: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_content_base")]
    pub content_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Files above this size use an upload session.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,
    /// Bytes per session append.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_delete_after_upload() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: RelayBackend::default(),
            delete_after_upload: default_delete_after_upload(),
            dropbox: None,
            directory: None,
        }
    }
}

fn default_root_folder() -> String {
    "/Evidence".to_string()
}

fn default_api_base() -> String {
    "https://api.dropboxapi.com".to_string()
}

fn default_content_base() -> String {
    "https://content.dropboxapi.com".to_string()
}

fn default_token_url() -> String {
    "https://api.dropbox.com/oauth2/token".to_string()
}

/// Largest body Dropbox accepts for a single-shot upload or one append.
pub const MAX_SINGLE_REQUEST_BYTES: u64 = 150 * 1024 * 1024;

fn default_chunk_threshold() -> u64 {
    MAX_SINGLE_REQUEST_BYTES // 150 MB
}

fn default_chunk_size() -> u64 {
    4 * 1024 * 1024 // 4 MB
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

impl DropboxConfig {
    /// Whether the refresh-token flow is fully configured.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.app_key.is_some() && self.app_secret.is_some()
    }
}

/// Local directory sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRelayConfig {
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropbox_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [dropbox]
            access_token = "sl.abc"
        "#,
        )
        .unwrap();
        assert_eq!(config.backend, RelayBackend::Dropbox);
        assert!(config.delete_after_upload);
        let dropbox = config.dropbox.unwrap();
        assert_eq!(dropbox.chunk_threshold, 150 * 1024 * 1024);
        assert_eq!(dropbox.chunk_size, 4 * 1024 * 1024);
        assert_eq!(dropbox.root_folder, "/Evidence");
        assert!(!dropbox.can_refresh());
    }

    #[test]
    fn test_directory_backend() {
        let config: RelayConfig = toml::from_str(
            r#"
            backend = "directory"
            [directory]
            path = "/archive"
        "#,
        )
        .unwrap();
        assert_eq!(config.backend, RelayBackend::Directory);
        assert_eq!(config.directory.unwrap().path, PathBuf::from("/archive"));
    }
}
