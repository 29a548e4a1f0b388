//! Progress signals from a job's output directory.

use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::fs;

/// Newest modification time of anything under `dir`, including `dir` itself.
/// `None` when the directory does not exist.
pub async fn newest_modification(dir: &Path) -> Option<DateTime<Utc>> {
    let mut newest = fs::metadata(dir).await.ok()?.modified().ok();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(mut entries) = fs::read_dir(&current).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if let Ok(modified) = metadata.modified() {
                if newest.map_or(true, |n| modified > n) {
                    newest = Some(modified);
                }
            }
            if metadata.is_dir() {
                pending.push(entry.path());
            }
        }
    }

    newest.map(DateTime::<Utc>::from)
}
