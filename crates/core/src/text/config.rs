//! Text understanding configuration.

use serde::{Deserialize, Serialize};

/// Which implementation answers credential and pre-filter questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMode {
    /// Deterministic rules only. Works offline.
    #[default]
    RulesOnly,
    /// Ask the LLM first, fall back to rules on any error.
    LlmFirst,
}

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Anthropic,
    /// Local Ollama instance.
    Ollama,
}

/// LLM client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Model name/identifier.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Custom API base URL (for proxies or self-hosted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    500
}

/// Text understanding configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default)]
    pub mode: TextMode,
    /// Required when `mode = "llm_first"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    /// Additional notes phrases that mean "do not acquire".
    #[serde(default)]
    pub extra_skip_phrases: Vec<String>,
}
