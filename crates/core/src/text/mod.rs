//! Free-text understanding: credential extraction and the acquisition pre-filter.
//!
//! Both capabilities have a deterministic rule-based implementation. The
//! LLM-backed implementations wrap an [`LlmClient`] and fall back to the rules
//! on any error, so the orchestrator never depends on a text service being up.

mod config;
mod credentials;
mod llm;
mod prefilter;

use std::sync::Arc;

pub use config::{LlmConfig, LlmProvider, TextConfig, TextMode};
pub use credentials::{CredentialParser, Credentials, LlmCredentialParser, RuleCredentialParser};
pub use llm::{
    create_llm_client, strip_code_fences, AnthropicClient, CompletionRequest,
    CompletionResponse, LlmClient, LlmError, OllamaClient,
};
pub use prefilter::{CasePreFilter, LlmNotesPreFilter, PreFilterDecision, RuleNotesPreFilter};

/// The text capabilities handed to the orchestrator.
#[derive(Clone)]
pub struct TextServices {
    pub credential_parser: Arc<dyn CredentialParser>,
    pub prefilter: Arc<dyn CasePreFilter>,
}

impl TextServices {
    /// Rule-based parser and pre-filter only.
    pub fn rules() -> Self {
        Self {
            credential_parser: Arc::new(RuleCredentialParser),
            prefilter: Arc::new(RuleNotesPreFilter::default()),
        }
    }

    /// Build the services selected by `config`.
    pub fn from_config(config: &TextConfig) -> Result<Self, LlmError> {
        let rules_filter = RuleNotesPreFilter::with_extra_phrases(&config.extra_skip_phrases);

        match config.mode {
            TextMode::RulesOnly => Ok(Self {
                credential_parser: Arc::new(RuleCredentialParser),
                prefilter: Arc::new(rules_filter),
            }),
            TextMode::LlmFirst => {
                let llm_config = config.llm.as_ref().ok_or(LlmError::NotConfigured)?;
                let client = create_llm_client(llm_config)?;
                Ok(Self {
                    credential_parser: Arc::new(LlmCredentialParser::new(client.clone())),
                    prefilter: Arc::new(LlmNotesPreFilter::new(client, rules_filter)),
                })
            }
        }
    }
}
