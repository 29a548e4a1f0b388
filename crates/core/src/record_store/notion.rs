//! Notion database record store.
//!
//! Cases are pages of a single database. Every field the orchestrator needs is a
//! page property; property names and status labels come from configuration.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::backoff::backoff_delay;

use super::config::{NotionConfig, StatusLabels};
use super::store::{RecordStore, RecordStoreError};
use super::types::{Case, CaseStatus};

/// Notion rejects rich-text objects longer than this.
const RICH_TEXT_LIMIT: usize = 2000;
const MAX_RETRY_DELAY_MS: u64 = 30_000;
const MAX_ALTERNATE_TARGETS: usize = 3;

/// Record store backed by a Notion database.
pub struct NotionRecordStore {
    client: Client,
    config: NotionConfig,
    labels: StatusLabels,
}

impl NotionRecordStore {
    /// Create a new store client.
    pub fn new(config: NotionConfig, labels: StatusLabels) -> Result<Self, RecordStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RecordStoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            labels,
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn map_request_error(e: reqwest::Error) -> RecordStoreError {
        if e.is_timeout() {
            RecordStoreError::Timeout
        } else {
            RecordStoreError::ConnectionFailed(e.to_string())
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RecordStoreError> {
        let url = format!("{}{}", self.base_url(), path);
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.config.api_key)
            .header("Notion-Version", &self.config.notion_version);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(Self::map_request_error)?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(RecordStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| RecordStoreError::InvalidData(e.to_string()))
    }

    /// Send a request, retrying transient failures with capped backoff.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RecordStoreError> {
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), path, body.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_base_ms, attempt, MAX_RETRY_DELAY_MS);
                    warn!(
                        "Notion request {} {} failed ({}), retrying in {:?}",
                        method, path, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Query the database, following cursors until exhausted or `limit` is reached.
    async fn query(&self, filter: Value, limit: Option<usize>) -> Result<Vec<Value>, RecordStoreError> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let path = format!(
            "/v1/databases/{}/query",
            urlencoding::encode(&self.config.database_id)
        );
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page_size = match limit {
                Some(l) => (l - pages.len()).min(self.config.page_size),
                None => self.config.page_size,
            }
            .max(1);

            let mut body = json!({ "filter": filter, "page_size": page_size });
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }

            let response = self.request(Method::POST, &path, Some(body)).await?;
            if let Some(results) = response.get("results").and_then(Value::as_array) {
                pages.extend(results.iter().cloned());
            }

            if let Some(l) = limit {
                if pages.len() >= l {
                    pages.truncate(l);
                    break;
                }
            }

            let has_more = response
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            cursor = response
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_more || cursor.is_none() {
                break;
            }
        }

        Ok(pages)
    }

    async fn update_properties(
        &self,
        case_id: &str,
        properties: Map<String, Value>,
    ) -> Result<(), RecordStoreError> {
        let path = format!("/v1/pages/{}", urlencoding::encode(case_id));
        self.request(Method::PATCH, &path, Some(json!({ "properties": properties })))
            .await
            .map_err(|e| not_found_as_case(e, case_id))?;
        Ok(())
    }

    async fn update_property(
        &self,
        case_id: &str,
        name: &str,
        value: Value,
    ) -> Result<(), RecordStoreError> {
        let mut properties = Map::new();
        properties.insert(name.to_string(), value);
        self.update_properties(case_id, properties).await
    }

    fn label_filter(&self, label: &str) -> Value {
        let mut filter = Map::new();
        filter.insert("property".to_string(), json!(self.config.properties.status));
        filter.insert(
            self.config.properties.status_kind.as_str().to_string(),
            json!({ "equals": label }),
        );
        Value::Object(filter)
    }

    fn eligible_filter(&self) -> Value {
        let status = self.label_filter(self.labels.label_for(CaseStatus::Eligible));
        match self.config.properties.target_fields.first() {
            Some(field) => json!({
                "and": [
                    status,
                    { "property": field, "url": { "is_not_empty": true } }
                ]
            }),
            None => status,
        }
    }

    fn in_progress_filter(&self) -> Value {
        let labels = self.labels.in_progress_labels();
        if labels.len() == 1 {
            self.label_filter(labels[0])
        } else {
            json!({ "or": labels.iter().map(|l| self.label_filter(l)).collect::<Vec<_>>() })
        }
    }

    fn status_value(&self, status: CaseStatus) -> Value {
        let mut value = Map::new();
        value.insert(
            self.config.properties.status_kind.as_str().to_string(),
            json!({ "name": self.labels.label_for(status) }),
        );
        Value::Object(value)
    }

    /// Build a case from a page object.
    fn parse_case(&self, page: &Value) -> Result<Case, RecordStoreError> {
        let id = page
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RecordStoreError::InvalidData("page without id".to_string()))?
            .to_string();
        let props = &self.config.properties;

        let label = property_text(page, &props.status);
        let status = label
            .as_deref()
            .and_then(|l| self.labels.status_for(l))
            .ok_or_else(|| {
                RecordStoreError::InvalidData(format!(
                    "page {} has unmapped status {:?}",
                    id, label
                ))
            })?;

        let mut targets: Vec<String> = props
            .target_fields
            .iter()
            .filter_map(|field| property_text(page, field))
            .collect();
        if let Some(extra) = props.extra_targets.as_deref().and_then(|f| property_text(page, f)) {
            targets.extend(
                extra
                    .split_whitespace()
                    .filter(|token| token.starts_with("http"))
                    .map(str::to_string),
            );
        }
        let mut seen = std::collections::HashSet::new();
        targets.retain(|t| seen.insert(t.clone()));

        let mut targets = targets.into_iter();
        let acquisition_target = targets.next().unwrap_or_default();
        let alternate_targets = targets.take(MAX_ALTERNATE_TARGETS).collect();

        let display_name = property_text(page, &props.display_name)
            .and_then(|text| text.lines().next().map(|l| l.trim().to_string()))
            .filter(|name| !name.is_empty())
            .or_else(|| page_title(page))
            .unwrap_or_else(|| "Untitled".to_string());

        let updated_at = page
            .get("last_edited_time")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Case {
            id,
            display_name,
            acquisition_target,
            alternate_targets,
            credential_blob: property_text(page, &props.credentials),
            notes: property_text(page, &props.notes),
            status,
            lock_owner: property_text(page, &props.lock_owner),
            active_job_ref: property_text(page, &props.job_ref),
            failure_reason: property_text(page, &props.failure_reason),
            upload_reference: property_text(page, &props.upload_reference),
            updated_at,
        })
    }

    fn parse_pages(&self, pages: &[Value]) -> Vec<Case> {
        pages
            .iter()
            .filter_map(|page| match self.parse_case(page) {
                Ok(case) => Some(case),
                Err(e) => {
                    warn!("Skipping unreadable case page: {}", e);
                    None
                }
            })
            .collect()
    }
}

fn not_found_as_case(e: RecordStoreError, case_id: &str) -> RecordStoreError {
    match e {
        RecordStoreError::Api { status: 404, .. } => {
            RecordStoreError::CaseNotFound(case_id.to_string())
        }
        other => other,
    }
}

/// Encode a rich-text property value.
fn rich_text(value: &str) -> Value {
    if value.is_empty() {
        return json!({ "rich_text": [] });
    }
    let content: String = value.chars().take(RICH_TEXT_LIMIT).collect();
    json!({ "rich_text": [{ "type": "text", "text": { "content": content } }] })
}

/// Plain text of a property, whatever its type. Empty values read as `None`.
fn property_text(page: &Value, name: &str) -> Option<String> {
    let prop = page.get("properties")?.get(name)?;
    let kind = prop.get("type").and_then(Value::as_str)?;

    let text = match kind {
        "rich_text" | "title" => prop
            .get(kind)?
            .as_array()?
            .iter()
            .filter_map(|item| {
                item.get("plain_text")
                    .or_else(|| item.get("text").and_then(|t| t.get("content")))
                    .and_then(Value::as_str)
            })
            .collect::<String>(),
        "url" | "email" | "phone_number" => prop.get(kind)?.as_str()?.to_string(),
        "select" | "status" => prop.get(kind)?.get("name")?.as_str()?.to_string(),
        _ => return None,
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Text of whichever property is the page title.
fn page_title(page: &Value) -> Option<String> {
    let props = page.get("properties")?.as_object()?;
    let name = props
        .iter()
        .find(|(_, p)| p.get("type").and_then(Value::as_str) == Some("title"))
        .map(|(name, _)| name.clone())?;
    property_text(page, &name)
}

#[async_trait]
impl RecordStore for NotionRecordStore {
    fn name(&self) -> &str {
        "notion"
    }

    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<Case>, RecordStoreError> {
        let pages = self.query(self.eligible_filter(), Some(limit)).await?;
        let cases: Vec<Case> = self
            .parse_pages(&pages)
            .into_iter()
            .filter(|c| c.status == CaseStatus::Eligible && c.has_target())
            .collect();
        debug!("Fetched {} eligible cases", cases.len());
        Ok(cases)
    }

    async fn get(&self, case_id: &str) -> Result<Case, RecordStoreError> {
        let path = format!("/v1/pages/{}", urlencoding::encode(case_id));
        let page = self
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| not_found_as_case(e, case_id))?;
        self.parse_case(&page)
    }

    async fn try_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError> {
        let current = self.get(case_id).await?;
        if current.status != CaseStatus::Eligible || current.lock_owner.is_some() {
            debug!(
                "Case {} not claimable (status {}, owner {:?})",
                case_id, current.status, current.lock_owner
            );
            return Ok(false);
        }

        let props = &self.config.properties;
        let mut properties = Map::new();
        properties.insert(props.status.clone(), self.status_value(CaseStatus::Claimed));
        properties.insert(props.lock_owner.clone(), rich_text(worker_id));
        self.update_properties(case_id, properties).await?;

        // Read back: a concurrent writer may have overwritten the owner.
        let confirmed = self.get(case_id).await?;
        Ok(confirmed.lock_owner.as_deref() == Some(worker_id))
    }

    async fn touch_claim(&self, case_id: &str, worker_id: &str) -> Result<bool, RecordStoreError> {
        let current = self.get(case_id).await?;
        if current.lock_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        let name = self.config.properties.lock_owner.clone();
        self.update_property(case_id, &name, rich_text(worker_id))
            .await?;
        Ok(true)
    }

    async fn release(&self, case_id: &str) {
        let name = self.config.properties.lock_owner.clone();
        if let Err(e) = self.update_property(case_id, &name, rich_text("")).await {
            warn!("Failed to release claim on case {}: {}", case_id, e);
        }
    }

    async fn set_status(&self, case_id: &str, status: CaseStatus) -> Result<(), RecordStoreError> {
        let name = self.config.properties.status.clone();
        self.update_property(case_id, &name, self.status_value(status))
            .await
    }

    async fn set_active_job(
        &self,
        case_id: &str,
        job_ref: Option<&str>,
    ) -> Result<(), RecordStoreError> {
        let name = self.config.properties.job_ref.clone();
        self.update_property(case_id, &name, rich_text(job_ref.unwrap_or("")))
            .await
    }

    async fn set_failure_reason(
        &self,
        case_id: &str,
        reason: &str,
    ) -> Result<(), RecordStoreError> {
        let name = self.config.properties.failure_reason.clone();
        self.update_property(case_id, &name, rich_text(reason)).await
    }

    async fn set_upload_reference(
        &self,
        case_id: &str,
        reference: &str,
    ) -> Result<(), RecordStoreError> {
        let name = self.config.properties.upload_reference.clone();
        self.update_property(case_id, &name, json!({ "url": reference }))
            .await
    }

    async fn count_by_status(&self, status: CaseStatus) -> Result<usize, RecordStoreError> {
        let filter = self.label_filter(self.labels.label_for(status));
        Ok(self.query(filter, None).await?.len())
    }

    async fn list_in_progress(&self) -> Result<Vec<Case>, RecordStoreError> {
        let pages = self.query(self.in_progress_filter(), None).await?;
        Ok(self.parse_pages(&pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> NotionRecordStore {
        let config: NotionConfig = toml::from_str(
            r#"
            api_key = "secret_test"
            database_id = "db-1"
            api_base = "http://localhost:9/"
        "#,
        )
        .unwrap();
        NotionRecordStore::new(config, StatusLabels::default()).unwrap()
    }

    fn page() -> Value {
        json!({
            "id": "page-abc",
            "last_edited_time": "2025-03-01T12:30:00.000Z",
            "properties": {
                "Name": { "type": "title", "title": [{ "plain_text": "Case 2025-17" }] },
                "Download Status": { "type": "select", "select": { "name": "Downloading" } },
                "Download Link": { "type": "url", "url": "https://portal.example/a" },
                "Download Link (2)": { "type": "url", "url": null },
                "Download Link (3)": { "type": "url", "url": "https://portal.example/b" },
                "Download Links (4)": {
                    "type": "rich_text",
                    "rich_text": [{ "plain_text": "see https://portal.example/c and https://portal.example/a" }]
                },
                "Download Login": {
                    "type": "rich_text",
                    "rich_text": [{ "plain_text": "Email: officer@example.com\nPassword: pw" }]
                },
                "Suspect": { "type": "rich_text", "rich_text": [{ "plain_text": "  Jane Doe \nsecond line" }] },
                "Worker Lock": { "type": "rich_text", "rich_text": [{ "plain_text": "worker-7" }] },
                "Job Reference": { "type": "rich_text", "rich_text": [] },
                "Dropbox URL": { "type": "url", "url": null }
            }
        })
    }

    #[test]
    fn test_parse_case_fields() {
        let case = store().parse_case(&page()).unwrap();

        assert_eq!(case.id, "page-abc");
        assert_eq!(case.display_name, "Jane Doe");
        assert_eq!(case.status, CaseStatus::Acquiring);
        assert_eq!(case.acquisition_target, "https://portal.example/a");
        assert_eq!(
            case.alternate_targets,
            vec!["https://portal.example/b", "https://portal.example/c"]
        );
        assert_eq!(case.lock_owner.as_deref(), Some("worker-7"));
        assert!(case.active_job_ref.is_none());
        assert!(case.upload_reference.is_none());
        assert!(case.notes.is_none());
        assert!(case.credential_blob.unwrap().contains("officer@example.com"));
        assert!(case.updated_at.is_some());
    }

    #[test]
    fn test_display_name_falls_back_to_title() {
        let mut page = page();
        page["properties"]["Suspect"] = json!({ "type": "rich_text", "rich_text": [] });
        let case = store().parse_case(&page).unwrap();
        assert_eq!(case.display_name, "Case 2025-17");

        page["properties"]
            .as_object_mut()
            .unwrap()
            .remove("Name");
        let case = store().parse_case(&page).unwrap();
        assert_eq!(case.display_name, "Untitled");
    }

    #[test]
    fn test_unmapped_status_is_invalid() {
        let mut page = page();
        page["properties"]["Download Status"] =
            json!({ "type": "select", "select": { "name": "Auto Uploaded" } });
        let result = store().parse_case(&page);
        assert!(matches!(result, Err(RecordStoreError::InvalidData(_))));
    }

    #[test]
    fn test_rich_text_truncates() {
        let long = "x".repeat(RICH_TEXT_LIMIT + 50);
        let value = rich_text(&long);
        let content = value["rich_text"][0]["text"]["content"].as_str().unwrap();
        assert_eq!(content.chars().count(), RICH_TEXT_LIMIT);

        assert_eq!(rich_text(""), json!({ "rich_text": [] }));
    }

    #[test]
    fn test_eligible_filter_shape() {
        let filter = store().eligible_filter();
        assert_eq!(
            filter["and"][0]["select"]["equals"],
            json!("Ready For Download")
        );
        assert_eq!(filter["and"][1]["property"], json!("Download Link"));
    }

    #[test]
    fn test_status_value_uses_kind() {
        let value = store().status_value(CaseStatus::Failed);
        assert_eq!(value, json!({ "select": { "name": "Failed" } }));
    }

    #[test]
    fn test_base_url_trims_slash() {
        assert_eq!(store().base_url(), "http://localhost:9");
    }
}
