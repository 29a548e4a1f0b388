//! Types for collected artifacts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file stored in a case destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Where the bytes came from (job output, staging file, mounted directory).
    pub source_path: PathBuf,
    /// Where the bytes now live.
    pub stored_path: PathBuf,
    /// Lowercase hex SHA-256.
    pub content_hash: String,
    pub size_bytes: u64,
}
