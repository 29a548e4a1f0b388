//! Case data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a case.
///
/// `Eligible -> Claimed -> Acquiring -> {Acquired | Failed | NotApplicable}`.
/// Terminal states are re-triggerable by an operator resetting the case to `Eligible`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Eligible,
    Claimed,
    Acquiring,
    Acquired,
    NotApplicable,
    Failed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Eligible => "eligible",
            CaseStatus::Claimed => "claimed",
            CaseStatus::Acquiring => "acquiring",
            CaseStatus::Acquired => "acquired",
            CaseStatus::NotApplicable => "not_applicable",
            CaseStatus::Failed => "failed",
        }
    }

    /// Claimed or Acquiring: a worker holds (or held) the case.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, CaseStatus::Claimed | CaseStatus::Acquiring)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseStatus::Acquired | CaseStatus::NotApplicable | CaseStatus::Failed
        )
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of evidence-acquisition work, one row of the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Opaque reference to the store row.
    pub id: String,
    /// Human label, used (sanitized) for destination folder naming.
    pub display_name: String,
    /// Address to fetch from. Only this one is used per run.
    pub acquisition_target: String,
    /// Up to three alternate addresses.
    #[serde(default)]
    pub alternate_targets: Vec<String>,
    /// Free text yielding a principal/secret pair.
    #[serde(default)]
    pub credential_blob: Option<String>,
    /// Free-text notes consulted by the pre-filter.
    #[serde(default)]
    pub notes: Option<String>,
    pub status: CaseStatus,
    /// Worker currently holding the claim.
    #[serde(default)]
    pub lock_owner: Option<String>,
    /// In-flight backend job, formatted as `backend:id`.
    #[serde(default)]
    pub active_job_ref: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Durable reference to the relayed files.
    #[serde(default)]
    pub upload_reference: Option<String>,
    /// Last time the store row was edited.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Case {
    /// Create an eligible case with only the required fields set.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        acquisition_target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            acquisition_target: acquisition_target.into(),
            alternate_targets: Vec::new(),
            credential_blob: None,
            notes: None,
            status: CaseStatus::Eligible,
            lock_owner: None,
            active_job_ref: None,
            failure_reason: None,
            upload_reference: None,
            updated_at: None,
        }
    }

    pub fn with_credentials(mut self, blob: impl Into<String>) -> Self {
        self.credential_blob = Some(blob.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = status;
        self
    }

    pub fn has_target(&self) -> bool {
        !self.acquisition_target.trim().is_empty()
    }
}
