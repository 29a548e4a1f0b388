//! Backend configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Backends that can appear in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Self-hosted browser-automation agent.
    RemoteAgent,
    /// Hosted instance of the same agent API.
    CloudAgent,
    /// Plain HTTP download of the target.
    DirectTransfer,
    /// Local browser script.
    ScriptedBrowser,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::RemoteAgent => "remote_agent",
            BackendKind::CloudAgent => "cloud_agent",
            BackendKind::DirectTransfer => "direct_transfer",
            BackendKind::ScriptedBrowser => "scripted_browser",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backends section: the chain plus one optional section per backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Fallback order. Each entry needs its section below.
    #[serde(default = "default_chain")]
    pub chain: Vec<BackendKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_agent: Option<RemoteAgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_agent: Option<RemoteAgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_transfer: Option<DirectTransferConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripted_browser: Option<ScriptedBrowserConfig>,
}

fn default_chain() -> Vec<BackendKind> {
    vec![BackendKind::RemoteAgent]
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            remote_agent: None,
            cloud_agent: None,
            direct_transfer: None,
            scripted_browser: None,
        }
    }
}

impl BackendsConfig {
    /// Whether the section for `kind` is present.
    pub fn is_configured(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::RemoteAgent => self.remote_agent.is_some(),
            BackendKind::CloudAgent => self.cloud_agent.is_some(),
            BackendKind::DirectTransfer => self.direct_transfer.is_some(),
            BackendKind::ScriptedBrowser => self.scripted_browser.is_some(),
        }
    }
}

/// Browser-automation agent API (`/jobs` contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAgentConfig {
    /// Base URL of the agent API, e.g. `http://localhost:8000/api/v1`.
    pub api_base: String,
    /// Sent as `x-api-key` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds (not the job timeout).
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Passed through to the agent to pick a browser locale/region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale_hint: Option<String>,
    /// Agent output root when mounted locally; jobs write to `{output_dir}/{job id}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

fn default_request_timeout() -> u64 {
    30
}

/// Direct HTTP transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectTransferConfig {
    /// Where in-progress transfers are written.
    #[serde(default = "default_transfer_dir")]
    pub work_dir: PathBuf,
    /// Connect timeout in seconds. Transfers themselves are bounded by the attempt timeouts.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_transfer_dir() -> PathBuf {
    PathBuf::from("./work/transfers")
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    concat!("evidence-fetcher/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for DirectTransferConfig {
    fn default() -> Self {
        Self {
            work_dir: default_transfer_dir(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Local browser script.
///
/// Invoked as `command [args...] <target> <output dir> <case name>` with the
/// credentials in `EVIDENCE_PRINCIPAL` / `EVIDENCE_SECRET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedBrowserConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Parent of the per-job output directories.
    #[serde(default = "default_script_dir")]
    pub work_dir: PathBuf,
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("./work/scripted")
}
