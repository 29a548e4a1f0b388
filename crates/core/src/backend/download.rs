//! Streaming HTTP downloads to disk.

use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::types::BackendError;

/// Write a response body to `path` chunk by chunk. `on_chunk` runs after every
/// chunk written. Returns the number of bytes written.
pub async fn stream_to_file(
    mut response: reqwest::Response,
    path: &Path,
    mut on_chunk: impl FnMut(usize) + Send,
) -> Result<u64, BackendError> {
    let file = File::create(path).await?;
    let mut writer = BufWriter::new(file);
    let mut total = 0u64;

    while let Some(chunk) = response.chunk().await.map_err(BackendError::from_reqwest)? {
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
        on_chunk(chunk.len());
    }

    writer.flush().await?;
    Ok(total)
}

/// File name from a `Content-Disposition` header value.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    // RFC 5987 `filename*=UTF-8''name` takes precedence over `filename=`.
    for part in value.split(';').map(str::trim) {
        if let Some(encoded) = part.strip_prefix("filename*=") {
            let encoded = encoded.rsplit("''").next().unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"')) {
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
        }
    }
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

/// Last non-empty path segment of a URL or path, without query or fragment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    let path = match path.split_once("://") {
        // Drop the authority so a bare host never reads as a file name.
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => path,
    };
    let segment = path.rsplit('/').find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}
