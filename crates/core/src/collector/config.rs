//! Configuration for the artifact collector.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Artifact collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Root under which one folder per case is created.
    #[serde(default = "default_destination_root")]
    pub destination_root: PathBuf,

    /// Buffer size for hashing copies in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Extra file-name substrings treated as non-evidence (case-insensitive).
    #[serde(default)]
    pub extra_denylist: Vec<String>,
}

fn default_destination_root() -> PathBuf {
    PathBuf::from("./evidence")
}

fn default_buffer_size() -> usize {
    1024 * 1024 // 1 MB
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            destination_root: default_destination_root(),
            buffer_size: default_buffer_size(),
            extra_denylist: Vec::new(),
        }
    }
}

impl CollectorConfig {
    /// Sets the destination root.
    pub fn with_destination_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.destination_root = root.into();
        self
    }
}
