//! Pre-filter deciding whether a claimed case should be acquired at all.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::record_store::Case;

use super::llm::{strip_code_fences, CompletionRequest, LlmClient};

/// Outcome of the pre-filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreFilterDecision {
    pub proceed: bool,
    pub reason: String,
}

impl PreFilterDecision {
    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            proceed: true,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            proceed: false,
            reason: reason.into(),
        }
    }
}

/// Decides from case metadata whether acquisition makes sense.
#[async_trait]
pub trait CasePreFilter: Send + Sync {
    fn name(&self) -> &str;

    async fn should_acquire(&self, case: &Case) -> PreFilterDecision;
}

/// Phrases meaning the files reached the requester some other way.
const OUT_OF_BAND_PHRASES: &[&str] = &[
    "sent via email",
    "emailed",
    "mailed on cd",
    "sent on usb",
    "delivered in person",
    "sent by mail",
    "not available online",
    "no files available",
    "no evidence",
    "case closed without files",
];

/// Phrase matching over the case notes.
#[derive(Debug, Clone)]
pub struct RuleNotesPreFilter {
    phrases: Vec<String>,
}

impl Default for RuleNotesPreFilter {
    fn default() -> Self {
        Self::with_extra_phrases(&[])
    }
}

impl RuleNotesPreFilter {
    pub fn with_extra_phrases(extra: &[String]) -> Self {
        let phrases = OUT_OF_BAND_PHRASES
            .iter()
            .map(|p| p.to_string())
            .chain(
                extra
                    .iter()
                    .map(|p| p.trim().to_lowercase())
                    .filter(|p| !p.is_empty()),
            )
            .collect();
        Self { phrases }
    }

    pub fn evaluate(&self, notes: Option<&str>) -> PreFilterDecision {
        let notes = notes.map(str::trim).unwrap_or_default();
        if notes.is_empty() {
            return PreFilterDecision::proceed("no notes");
        }

        let lowered = notes.to_lowercase();
        match self.phrases.iter().find(|p| lowered.contains(p.as_str())) {
            Some(phrase) => PreFilterDecision::skip(format!(
                "notes indicate files are not available online ('{}')",
                phrase
            )),
            None => PreFilterDecision::proceed("notes do not indicate out-of-band delivery"),
        }
    }
}

#[async_trait]
impl CasePreFilter for RuleNotesPreFilter {
    fn name(&self) -> &str {
        "rules"
    }

    async fn should_acquire(&self, case: &Case) -> PreFilterDecision {
        self.evaluate(case.notes.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct PreFilterReply {
    should_acquire: bool,
    #[serde(default)]
    reason: String,
}

/// Asks an LLM about the notes; the phrase rules answer when it cannot.
pub struct LlmNotesPreFilter {
    client: Arc<dyn LlmClient>,
    fallback: RuleNotesPreFilter,
}

impl LlmNotesPreFilter {
    pub fn new(client: Arc<dyn LlmClient>, fallback: RuleNotesPreFilter) -> Self {
        Self { client, fallback }
    }

    fn prompt(case: &Case, notes: &str) -> String {
        format!(
            "You are evaluating whether a legal case's evidence files should be downloaded \
automatically from an online portal.

Case:
- Name: {}
- Download link: {}
- Notes: {}

Answer false if the notes say the files were emailed, mailed on CD, sent on USB, sent by mail \
or delivered in person, or that no files are available online. Answer true otherwise, including \
when the notes do not mention delivery at all.

Respond with ONLY a JSON object, no markdown:
{{\"should_acquire\": true, \"reason\": \"brief explanation\"}}",
            case.display_name, case.acquisition_target, notes
        )
    }

    async fn ask(&self, case: &Case, notes: &str) -> Result<PreFilterDecision, String> {
        let request = CompletionRequest::new(Self::prompt(case, notes)).with_max_tokens(200);
        let response = self
            .client
            .complete(request)
            .await
            .map_err(|e| e.to_string())?;
        let reply: PreFilterReply = serde_json::from_str(strip_code_fences(&response.text))
            .map_err(|e| format!("unparseable reply: {}", e))?;

        let reason = if reply.reason.trim().is_empty() {
            "no reason given".to_string()
        } else {
            reply.reason.trim().to_string()
        };
        Ok(PreFilterDecision {
            proceed: reply.should_acquire,
            reason,
        })
    }
}

#[async_trait]
impl CasePreFilter for LlmNotesPreFilter {
    fn name(&self) -> &str {
        "llm"
    }

    async fn should_acquire(&self, case: &Case) -> PreFilterDecision {
        let notes = case.notes.as_deref().map(str::trim).unwrap_or_default();
        if notes.is_empty() {
            return PreFilterDecision::proceed("no notes");
        }

        match self.ask(case, notes).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("LLM pre-filter failed for case {}, using rules: {}", case.id, e);
                self.fallback.evaluate(Some(notes))
            }
        }
    }
}
