//! Collector and per-attempt collection session.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::record_store::Case;

use super::config::CollectorConfig;
use super::error::CollectorError;
use super::filter::ArtifactFilter;
use super::sanitize::{case_folder_name, sanitize_segment};
use super::types::Artifact;

/// Hidden working directory inside a case destination. Never indexed or relayed.
pub const STAGING_DIR: &str = ".incoming";

/// Opens collection sessions on case destinations.
#[derive(Debug, Clone)]
pub struct ArtifactCollector {
    config: CollectorConfig,
    filter: ArtifactFilter,
}

impl ArtifactCollector {
    pub fn new(config: CollectorConfig) -> Self {
        let filter = ArtifactFilter::new(&config.extra_denylist);
        Self { config, filter }
    }

    pub fn filter(&self) -> &ArtifactFilter {
        &self.filter
    }

    /// Destination folder for a case.
    pub fn destination_for(&self, case: &Case) -> PathBuf {
        self.config
            .destination_root
            .join(case_folder_name(&case.display_name, &case.id))
    }

    /// Open a session on `destination`.
    ///
    /// Indexes every evidence file already present by content hash. When two
    /// existing files share a hash, the later one (by name) is left over from
    /// an interrupted run and is removed.
    pub async fn open(&self, destination: &Path) -> Result<CollectionSession, CollectorError> {
        fs::create_dir_all(destination)
            .await
            .map_err(|e| CollectorError::DirectoryCreationFailed {
                path: destination.to_path_buf(),
                source: e,
            })?;

        let mut existing = Vec::new();
        let mut entries = fs::read_dir(destination).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if self.filter.is_evidence(&name) {
                existing.push(entry.path());
            }
        }
        existing.sort();

        let mut index: HashMap<String, PathBuf> = HashMap::new();
        let mut removed = 0;
        for path in existing {
            let (hash, _) = hash_file(&path, self.config.buffer_size).await?;
            if let Some(kept) = index.get(&hash) {
                warn!(
                    "Removing duplicate {} (same content as {})",
                    path.display(),
                    kept.display()
                );
                fs::remove_file(&path).await?;
                removed += 1;
            } else {
                index.insert(hash, path);
            }
        }

        debug!(
            "Opened {} with {} indexed files ({} duplicates removed)",
            destination.display(),
            index.len(),
            removed
        );

        Ok(CollectionSession {
            destination: destination.to_path_buf(),
            staging_root: destination.join(STAGING_DIR),
            index,
            filter: self.filter.clone(),
            buffer_size: self.config.buffer_size,
            stored: Vec::new(),
            duplicates_skipped: 0,
        })
    }
}

/// One attempt's view of a case destination.
pub struct CollectionSession {
    destination: PathBuf,
    staging_root: PathBuf,
    /// content hash -> stored path
    index: HashMap<String, PathBuf>,
    filter: ArtifactFilter,
    buffer_size: usize,
    stored: Vec<Artifact>,
    duplicates_skipped: usize,
}

impl CollectionSession {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Whether a file with this name would be considered at all.
    pub fn accepts(&self, file_name: &str) -> bool {
        self.filter.is_evidence(file_name)
    }

    /// Number of distinct contents currently in the destination.
    pub fn indexed(&self) -> usize {
        self.index.len()
    }

    /// Artifacts newly stored by this session.
    pub fn stored(&self) -> &[Artifact] {
        &self.stored
    }

    pub fn duplicates_skipped(&self) -> usize {
        self.duplicates_skipped
    }

    /// Fresh path under the staging area for a download named `file_name`.
    pub async fn staging_path(&self, file_name: &str) -> Result<PathBuf, CollectorError> {
        let dir = self.staging_root.join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CollectorError::DirectoryCreationFailed {
                path: dir.clone(),
                source: e,
            })?;
        let name = sanitize_segment(file_name);
        let name = if name.is_empty() {
            "download.bin".to_string()
        } else {
            name
        };
        Ok(dir.join(name))
    }

    /// Copy `source` into the destination unless it is filtered out or its
    /// content is already present. The source is left in place.
    pub async fn ingest_file(&mut self, source: &Path) -> Result<Option<Artifact>, CollectorError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.accepts(&name) {
            debug!("Skipping non-evidence file {}", source.display());
            return Ok(None);
        }

        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(CollectorError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        fs::create_dir_all(&self.staging_root)
            .await
            .map_err(|e| CollectorError::DirectoryCreationFailed {
                path: self.staging_root.clone(),
                source: e,
            })?;
        let partial = self
            .staging_root
            .join(format!("{}.partial", uuid::Uuid::new_v4()));

        let (hash, size) = match copy_hashed(source, &partial, self.buffer_size).await {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Some(existing) = self.index.get(&hash) {
            debug!(
                "{} duplicates {}, not stored",
                source.display(),
                existing.display()
            );
            fs::remove_file(&partial).await?;
            self.duplicates_skipped += 1;
            metrics::DUPLICATES_SKIPPED.inc();
            return Ok(None);
        }

        let target = unique_target(&self.destination, &name).await;
        fs::rename(&partial, &target)
            .await
            .map_err(|e| CollectorError::copy_failed(source.to_path_buf(), target.clone(), e))?;

        info!("Stored {} ({} bytes)", target.display(), size);
        metrics::ARTIFACTS_STORED.inc();

        let artifact = Artifact {
            source_path: source.to_path_buf(),
            stored_path: target.clone(),
            content_hash: hash.clone(),
            size_bytes: size,
        };
        self.index.insert(hash, target);
        self.stored.push(artifact.clone());
        Ok(Some(artifact))
    }

    /// Ingest a file from the staging area and remove it afterwards.
    pub async fn ingest_staged(&mut self, staged: &Path) -> Result<Option<Artifact>, CollectorError> {
        let result = self.ingest_file(staged).await;
        if let Err(e) = fs::remove_file(staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not remove staged file {}: {}", staged.display(), e);
            }
        }
        result
    }

    /// Ingest every file under `dir`, recursively. A missing directory yields nothing.
    pub async fn ingest_directory(&mut self, dir: &Path) -> Result<Vec<Artifact>, CollectorError> {
        let mut artifacts = Vec::new();
        if !fs::try_exists(dir).await.unwrap_or(false) {
            return Ok(artifacts);
        }

        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if !entry.file_name().to_string_lossy().starts_with('.') {
                        pending.push(path);
                    }
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();

        for file in files {
            if let Some(artifact) = self.ingest_file(&file).await? {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }

    /// Remove the staging area and return what this session stored.
    pub async fn finish(self) -> Vec<Artifact> {
        if let Err(e) = fs::remove_dir_all(&self.staging_root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to clean staging area {}: {}",
                    self.staging_root.display(),
                    e
                );
            }
        }
        self.stored
    }
}

/// First free name in `dir`: `name`, then `stem (1).ext`, `stem (2).ext`, ...
async fn unique_target(dir: &Path, name: &str) -> PathBuf {
    let clean = sanitize_segment(name);
    let clean = if clean.is_empty() {
        "artifact".to_string()
    } else {
        clean
    };

    let candidate = dir.join(&clean);
    if !fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let path = Path::new(&clean);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| clean.clone());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

async fn hash_file(path: &Path, buffer_size: usize) -> Result<(String, u64), CollectorError> {
    let file = File::open(path)
        .await
        .map_err(|e| CollectorError::ChecksumCalculationFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut reader = BufReader::with_capacity(buffer_size, file);
    let mut buffer = vec![0u8; buffer_size];
    let mut hasher = Sha256::new();
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).await.map_err(|e| {
            CollectorError::ChecksumCalculationFailed {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), total))
}

/// Copy while hashing; returns (sha256 hex, bytes copied).
async fn copy_hashed(
    source: &Path,
    destination: &Path,
    buffer_size: usize,
) -> Result<(String, u64), CollectorError> {
    let source_file = File::open(source).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CollectorError::SourceNotFound {
                path: source.to_path_buf(),
            }
        } else {
            CollectorError::Io(e)
        }
    })?;

    let dest_file = File::create(destination).await.map_err(|e| {
        CollectorError::copy_failed(source.to_path_buf(), destination.to_path_buf(), e)
    })?;

    let mut reader = BufReader::with_capacity(buffer_size, source_file);
    let mut writer = BufWriter::with_capacity(buffer_size, dest_file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size];
    let mut total_bytes = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).await.map_err(|e| {
            CollectorError::copy_failed(source.to_path_buf(), destination.to_path_buf(), e)
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        writer.write_all(&buffer[..bytes_read]).await.map_err(|e| {
            CollectorError::copy_failed(source.to_path_buf(), destination.to_path_buf(), e)
        })?;
        total_bytes += bytes_read as u64;
    }

    writer.flush().await.map_err(|e| {
        CollectorError::copy_failed(source.to_path_buf(), destination.to_path_buf(), e)
    })?;

    Ok((format!("{:x}", hasher.finalize()), total_bytes))
}
