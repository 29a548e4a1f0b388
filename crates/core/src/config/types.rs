use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

use crate::backend::BackendsConfig;
use crate::collector::CollectorConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::record_store::RecordStoreConfig;
use crate::relay::RelayConfig;
use crate::text::TextConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Identity written into the lock field of claimed cases. Must be unique
    /// per running process; the default is `{hostname}-{pid}`.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
    #[serde(default)]
    pub server: ServerConfig,
    pub store: RecordStoreConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub text: TextConfig,
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "evidence-worker".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Status server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}
