//! Relaying a whole case folder.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::metrics;

use super::types::{RelayError, RelaySink};

/// Result of relaying one case folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    /// Shared reference to the remote case folder.
    pub reference: String,
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
}

async fn top_level_files(dir: &Path) -> Result<Vec<PathBuf>, RelayError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Upload every visible top-level file of `dir`, then return a shared
/// reference to the remote case folder.
///
/// Stops at the first failed upload. With `delete_after_upload`, each file is
/// removed locally once its upload succeeded.
pub async fn relay_case_folder(
    sink: &dyn RelaySink,
    dir: &Path,
    case_name: &str,
    delete_after_upload: bool,
) -> Result<RelayReport, RelayError> {
    let files = top_level_files(dir).await?;
    if files.is_empty() {
        return Err(RelayError::NothingToUpload(dir.to_path_buf()));
    }

    let mut bytes_uploaded = 0;
    for file in &files {
        let uploaded = match sink.upload(file, case_name).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                metrics::RELAY_UPLOADS.with_label_values(&["failure"]).inc();
                return Err(e);
            }
        };
        metrics::RELAY_UPLOADS.with_label_values(&["success"]).inc();
        metrics::RELAY_BYTES.inc_by(uploaded.size_bytes);
        bytes_uploaded += uploaded.size_bytes;

        if delete_after_upload {
            if let Err(e) = tokio::fs::remove_file(file).await {
                warn!("Failed to remove relayed file {}: {}", file.display(), e);
            }
        }
    }

    let reference = sink
        .get_or_create_shared_reference(&sink.folder_for(case_name))
        .await?;

    info!(
        "Relayed {} files ({} bytes) for {} via {}",
        files.len(),
        bytes_uploaded,
        case_name,
        sink.name()
    );

    Ok(RelayReport {
        reference,
        files_uploaded: files.len(),
        bytes_uploaded,
    })
}
