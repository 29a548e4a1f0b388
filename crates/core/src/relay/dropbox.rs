//! Dropbox relay sink.
//!
//! Small files go through `files/upload`; anything above the configured
//! threshold uses an upload session (`start`, `append_v2`, `finish`). Both
//! overwrite an existing file of the same name. Short-lived access tokens are
//! renewed from the refresh token when the API answers 401.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backoff::backoff_delay;
use crate::collector::sanitize_segment;

use super::config::DropboxConfig;
use super::types::{RelayError, RelaySink, UploadedFile};

const MAX_RETRY_DELAY_MS: u64 = 60_000;
const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const SELECT_USER_HEADER: &str = "Dropbox-API-Select-User";

/// Encode an API argument for the `Dropbox-API-Arg` header.
///
/// Header values must be ASCII, so every non-ASCII character (and DEL) is
/// written as a `\uXXXX` escape, using surrogate pairs above the BMP.
pub fn header_safe_json(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() && c != '\u{7f}' {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

fn is_conflict(error: &RelayError, tag: &str) -> bool {
    matches!(error, RelayError::Api { status: 409, message } if message.contains(tag))
}

/// Relay sink writing to a Dropbox account or team space.
pub struct DropboxRelay {
    client: Client,
    config: DropboxConfig,
    access_token: RwLock<Option<String>>,
    known_folders: Mutex<HashSet<String>>,
}

impl DropboxRelay {
    pub fn new(config: DropboxConfig) -> Result<Self, RelayError> {
        if config.access_token.is_none() && !config.can_refresh() {
            return Err(RelayError::NotConfigured(
                "dropbox needs access_token or app_key, app_secret and refresh_token".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            access_token: RwLock::new(config.access_token.clone()),
            config,
            known_folders: Mutex::new(HashSet::new()),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/2/{}", self.config.api_base.trim_end_matches('/'), endpoint)
    }

    fn content_url(&self, endpoint: &str) -> String {
        format!(
            "{}/2/{}",
            self.config.content_base.trim_end_matches('/'),
            endpoint
        )
    }

    /// Current token, refreshing first when none is cached.
    async fn token(&self) -> Result<String, RelayError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> Result<String, RelayError> {
        let (Some(refresh), Some(key), Some(secret)) = (
            &self.config.refresh_token,
            &self.config.app_key,
            &self.config.app_secret,
        ) else {
            return Err(RelayError::Auth(
                "access token rejected and no refresh token configured".to_string(),
            ));
        };

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh.as_str()),
                ("client_id", key.as_str()),
                ("client_secret", secret.as_str()),
            ])
            .send()
            .await
            .map_err(RelayError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RelayError::Auth(format!("token refresh failed ({}): {}", status, text)));
        }

        let body: Value = response.json().await.map_err(RelayError::from_reqwest)?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Auth("token response without access_token".to_string()))?
            .to_string();

        *self.access_token.write().await = Some(token.clone());
        info!("Refreshed Dropbox access token");
        Ok(token)
    }

    async fn read_response(response: Response) -> Result<Value, RelayError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("error_summary")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(text);
            return Err(RelayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await.map_err(RelayError::from_reqwest)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RelayError::InvalidResponse(e.to_string()))
    }

    async fn send_once(
        &self,
        url: &str,
        arg: Option<&Value>,
        body: Option<&Value>,
        data: Option<&[u8]>,
    ) -> Result<Value, RelayError> {
        let token = self.token().await?;
        let mut request = self.client.post(url).bearer_auth(token);
        if let Some(member) = &self.config.member_id {
            request = request.header(SELECT_USER_HEADER, member);
        }
        if let Some(arg) = arg {
            request = request
                .header(API_ARG_HEADER, header_safe_json(arg))
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(data.unwrap_or_default().to_vec());
        } else if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(RelayError::from_reqwest)?;
        Self::read_response(response).await
    }

    /// Send with retries. A 401 triggers one token refresh.
    async fn send(
        &self,
        url: &str,
        arg: Option<&Value>,
        body: Option<&Value>,
        data: Option<&[u8]>,
    ) -> Result<Value, RelayError> {
        let mut attempt = 0;
        let mut refreshed = false;
        loop {
            match self.send_once(url, arg, body, data).await {
                Ok(value) => return Ok(value),
                Err(RelayError::Api { status: 401, .. }) if !refreshed && self.config.can_refresh() => {
                    refreshed = true;
                    *self.access_token.write().await = None;
                    self.refresh_token().await?;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_base_ms, attempt, MAX_RETRY_DELAY_MS);
                    warn!("Dropbox request {} failed ({}), retrying in {:?}", url, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn rpc(&self, endpoint: &str, body: Value) -> Result<Value, RelayError> {
        self.send(&self.api_url(endpoint), None, Some(&body), None)
            .await
    }

    async fn content(&self, endpoint: &str, arg: Value, data: &[u8]) -> Result<Value, RelayError> {
        self.send(&self.content_url(endpoint), Some(&arg), None, Some(data))
            .await
    }

    /// Create `path` unless it already exists.
    async fn ensure_folder(&self, path: &str) -> Result<(), RelayError> {
        if self.known_folders.lock().await.contains(path) {
            return Ok(());
        }

        match self
            .rpc(
                "files/create_folder_v2",
                json!({ "path": path, "autorename": false }),
            )
            .await
        {
            Ok(_) => debug!("Created Dropbox folder {}", path),
            Err(e) if is_conflict(&e, "path/conflict") => {}
            Err(e) => return Err(e),
        }

        self.known_folders.lock().await.insert(path.to_string());
        Ok(())
    }

    fn commit_info(remote_path: &str) -> Value {
        json!({
            "path": remote_path,
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        })
    }

    async fn upload_chunked(
        &self,
        local_path: &Path,
        remote_path: &str,
        size: u64,
    ) -> Result<(), RelayError> {
        let mut file = tokio::fs::File::open(local_path).await?;
        let chunk_size = self.config.chunk_size.max(1) as usize;
        let mut buffer = vec![0u8; chunk_size];

        let read = read_chunk(&mut file, &mut buffer).await?;
        let started = self
            .content(
                "files/upload_session/start",
                json!({ "close": false }),
                &buffer[..read],
            )
            .await?;
        let session_id = started
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidResponse("upload session without id".to_string()))?
            .to_string();
        let mut offset = read as u64;

        loop {
            let read = read_chunk(&mut file, &mut buffer).await?;
            let cursor = json!({ "session_id": session_id, "offset": offset });

            if read == 0 || offset + read as u64 >= size {
                self.content(
                    "files/upload_session/finish",
                    json!({ "cursor": cursor, "commit": Self::commit_info(remote_path) }),
                    &buffer[..read],
                )
                .await?;
                return Ok(());
            }

            self.content(
                "files/upload_session/append_v2",
                json!({ "cursor": cursor, "close": false }),
                &buffer[..read],
            )
            .await?;
            offset += read as u64;
            debug!("Uploaded {}/{} bytes of {}", offset, size, remote_path);
        }
    }

    async fn list_shared_link(&self, remote_path: &str) -> Result<Option<String>, RelayError> {
        let response = self
            .rpc(
                "sharing/list_shared_links",
                json!({ "path": remote_path, "direct_only": true }),
            )
            .await?;
        Ok(response
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| links.first())
            .and_then(|link| link.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

/// Fill `buffer` as far as the file allows.
async fn read_chunk(file: &mut tokio::fs::File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl RelaySink for DropboxRelay {
    fn name(&self) -> &str {
        "dropbox"
    }

    fn folder_for(&self, case_name: &str) -> String {
        let root = self.config.root_folder.trim_end_matches('/');
        let root = if root.starts_with('/') || root.is_empty() {
            root.to_string()
        } else {
            format!("/{}", root)
        };
        format!("{}/{}", root, sanitize_segment(case_name))
    }

    async fn upload(&self, local_path: &Path, case_name: &str) -> Result<UploadedFile, RelayError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RelayError::NothingToUpload(local_path.to_path_buf()))?;
        let folder = self.folder_for(case_name);
        self.ensure_folder(&folder).await?;

        let remote_path = format!("{}/{}", folder, file_name);
        let size = tokio::fs::metadata(local_path).await?.len();

        if size <= self.config.chunk_threshold {
            let data = tokio::fs::read(local_path).await?;
            self.content("files/upload", Self::commit_info(&remote_path), &data)
                .await?;
        } else {
            self.upload_chunked(local_path, &remote_path, size).await?;
        }

        info!("Uploaded {} ({} bytes) to Dropbox", remote_path, size);
        Ok(UploadedFile {
            remote_path,
            size_bytes: size,
        })
    }

    async fn get_or_create_shared_reference(&self, remote_path: &str) -> Result<String, RelayError> {
        if let Some(url) = self.list_shared_link(remote_path).await? {
            return Ok(url);
        }

        match self
            .rpc(
                "sharing/create_shared_link_with_settings",
                json!({ "path": remote_path }),
            )
            .await
        {
            Ok(created) => created
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RelayError::InvalidResponse("shared link without url".to_string())),
            Err(e) if is_conflict(&e, "shared_link_already_exists") => self
                .list_shared_link(remote_path)
                .await?
                .ok_or_else(|| RelayError::InvalidResponse("shared link vanished".to_string())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DropboxConfig {
        toml::from_str(
            r#"
            access_token = "sl.token"
            root_folder = "Evidence/"
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_header_safe_json_escapes_non_ascii() {
        let arg = json!({ "path": "/Evidence/Müller 📁" });
        let encoded = header_safe_json(&arg);
        assert!(encoded.is_ascii());
        assert!(encoded.contains("M\\u00fcller"));
        assert!(encoded.contains("\\ud83d\\udcc1"));

        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, arg);
    }

    #[test]
    fn test_folder_for_normalizes_root() {
        let relay = DropboxRelay::new(config()).unwrap();
        assert_eq!(relay.folder_for("Doe: v. Roe"), "/Evidence/Doe_ v. Roe");
    }

    #[test]
    fn test_requires_credentials() {
        let mut config = config();
        config.access_token = None;
        assert!(matches!(
            DropboxRelay::new(config.clone()),
            Err(RelayError::NotConfigured(_))
        ));

        config.refresh_token = Some("r".to_string());
        config.app_key = Some("k".to_string());
        config.app_secret = Some("s".to_string());
        assert!(DropboxRelay::new(config).is_ok());
    }

    #[test]
    fn test_conflict_detection() {
        let err = RelayError::Api {
            status: 409,
            message: "path/conflict/folder/..".to_string(),
        };
        assert!(is_conflict(&err, "path/conflict"));
        assert!(!is_conflict(&err, "shared_link_already_exists"));
        assert!(!err.is_transient());
    }
}
