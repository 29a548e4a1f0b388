//! Record store configuration.

use serde::{Deserialize, Serialize};

use super::types::CaseStatus;

/// Available record store backends.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Notion,
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordStoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Notion database settings (required when backend = "notion").
    #[serde(default)]
    pub notion: Option<NotionConfig>,
    /// Status labels as the store spells them.
    #[serde(default)]
    pub labels: StatusLabels,
}

/// Notion database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotionConfig {
    /// Integration token.
    pub api_key: String,
    /// Database holding the cases.
    pub database_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_notion_version")]
    pub notion_version: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Page size for database queries (Notion caps this at 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Retries for transient failures before an error surfaces.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for retry backoff (milliseconds).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default)]
    pub properties: NotionProperties,
}

fn default_api_base() -> String {
    "https://api.notion.com".to_string()
}

fn default_notion_version() -> String {
    "2022-06-28".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_page_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000 // 1 second
}

/// How the status property is typed in the database.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusPropertyKind {
    #[default]
    Select,
    Status,
}

impl StatusPropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPropertyKind::Select => "select",
            StatusPropertyKind::Status => "status",
        }
    }
}

/// Property names of the case database.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotionProperties {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub status_kind: StatusPropertyKind,
    /// URL-typed locator properties, in priority order.
    #[serde(default = "default_target_fields")]
    pub target_fields: Vec<String>,
    /// Free-text property holding extra locators separated by whitespace.
    #[serde(default = "default_extra_targets")]
    pub extra_targets: Option<String>,
    #[serde(default = "default_credentials")]
    pub credentials: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_notes")]
    pub notes: String,
    #[serde(default = "default_lock_owner")]
    pub lock_owner: String,
    #[serde(default = "default_job_ref")]
    pub job_ref: String,
    #[serde(default = "default_failure_reason")]
    pub failure_reason: String,
    #[serde(default = "default_upload_reference")]
    pub upload_reference: String,
}

fn default_status() -> String {
    "Download Status".to_string()
}

fn default_target_fields() -> Vec<String> {
    vec![
        "Download Link".to_string(),
        "Download Link (2)".to_string(),
        "Download Link (3)".to_string(),
    ]
}

fn default_extra_targets() -> Option<String> {
    Some("Download Links (4)".to_string())
}

fn default_credentials() -> String {
    "Download Login".to_string()
}

fn default_display_name() -> String {
    "Suspect".to_string()
}

fn default_notes() -> String {
    "Notes".to_string()
}

fn default_lock_owner() -> String {
    "Worker Lock".to_string()
}

fn default_job_ref() -> String {
    "Job Reference".to_string()
}

fn default_failure_reason() -> String {
    "Failure Reason".to_string()
}

fn default_upload_reference() -> String {
    "Dropbox URL".to_string()
}

impl Default for NotionProperties {
    fn default() -> Self {
        Self {
            status: default_status(),
            status_kind: StatusPropertyKind::default(),
            target_fields: default_target_fields(),
            extra_targets: default_extra_targets(),
            credentials: default_credentials(),
            display_name: default_display_name(),
            notes: default_notes(),
            lock_owner: default_lock_owner(),
            job_ref: default_job_ref(),
            failure_reason: default_failure_reason(),
            upload_reference: default_upload_reference(),
        }
    }
}

/// Mapping of internal statuses onto the labels the store exposes.
///
/// Several statuses may share one label when the store cannot represent the full
/// state machine; reading a shared label back yields the later status.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusLabels {
    #[serde(default = "default_eligible")]
    pub eligible: String,
    #[serde(default = "default_in_progress")]
    pub claimed: String,
    #[serde(default = "default_in_progress")]
    pub acquiring: String,
    #[serde(default = "default_acquired")]
    pub acquired: String,
    #[serde(default = "default_not_applicable")]
    pub not_applicable: String,
    #[serde(default = "default_failed")]
    pub failed: String,
}

fn default_eligible() -> String {
    "Ready For Download".to_string()
}

fn default_in_progress() -> String {
    "Downloading".to_string()
}

fn default_acquired() -> String {
    "Downloaded".to_string()
}

fn default_not_applicable() -> String {
    "Not Applicable".to_string()
}

fn default_failed() -> String {
    "Failed".to_string()
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            eligible: default_eligible(),
            claimed: default_in_progress(),
            acquiring: default_in_progress(),
            acquired: default_acquired(),
            not_applicable: default_not_applicable(),
            failed: default_failed(),
        }
    }
}

impl StatusLabels {
    /// Label written to the store for a status.
    pub fn label_for(&self, status: CaseStatus) -> &str {
        match status {
            CaseStatus::Eligible => &self.eligible,
            CaseStatus::Claimed => &self.claimed,
            CaseStatus::Acquiring => &self.acquiring,
            CaseStatus::Acquired => &self.acquired,
            CaseStatus::NotApplicable => &self.not_applicable,
            CaseStatus::Failed => &self.failed,
        }
    }

    /// Status for a label read from the store.
    pub fn status_for(&self, label: &str) -> Option<CaseStatus> {
        // Acquiring is checked before Claimed so a shared label reads back as Acquiring.
        [
            CaseStatus::Eligible,
            CaseStatus::Acquiring,
            CaseStatus::Claimed,
            CaseStatus::Acquired,
            CaseStatus::NotApplicable,
            CaseStatus::Failed,
        ]
        .into_iter()
        .find(|status| self.label_for(*status) == label)
    }

    /// Distinct labels covering Claimed and Acquiring.
    pub fn in_progress_labels(&self) -> Vec<&str> {
        let mut labels = vec![self.claimed.as_str()];
        if self.acquiring != self.claimed {
            labels.push(self.acquiring.as_str());
        }
        labels
    }
}
