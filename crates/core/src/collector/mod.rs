//! Artifact collection and content deduplication.
//!
//! A [`CollectionSession`] owns one case destination for the duration of a
//! backend attempt. It indexes what is already there by SHA-256, then accepts
//! files from any number of sources, storing each distinct content once.

mod config;
mod error;
mod filter;
mod sanitize;
mod session;
mod types;

pub use config::CollectorConfig;
pub use error::CollectorError;
pub use filter::ArtifactFilter;
pub use sanitize::{case_folder_name, sanitize_segment};
pub use session::{ArtifactCollector, CollectionSession, STAGING_DIR};
pub use types::Artifact;
