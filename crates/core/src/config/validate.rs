use crate::relay::{RelayBackend, MAX_SINGLE_REQUEST_BYTES};
use crate::text::TextMode;

use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

/// Validate configuration.
///
/// Rejects settings the process could start with but never work under:
/// missing store credentials, an unusable backend chain, zero intervals or
/// timeouts, a relay without its section and text mode without an LLM.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.worker_id.trim().is_empty() {
        return invalid("worker_id cannot be empty");
    }

    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    match &config.store.notion {
        None => return invalid("[store.notion] section is required"),
        Some(notion) if notion.api_key.trim().is_empty() => {
            return invalid("store.notion.api_key cannot be empty")
        }
        Some(notion) if notion.database_id.trim().is_empty() => {
            return invalid("store.notion.database_id cannot be empty")
        }
        Some(_) => {}
    }

    if config.backends.chain.is_empty() {
        return invalid("backends.chain cannot be empty");
    }
    for kind in &config.backends.chain {
        if !config.backends.is_configured(*kind) {
            return invalid(format!(
                "backends.chain lists '{}' but [backends.{}] is missing",
                kind, kind
            ));
        }
    }

    let orchestrator = &config.orchestrator;
    if orchestrator.max_concurrent == 0 {
        return invalid("orchestrator.max_concurrent cannot be 0");
    }
    if orchestrator.scheduler_poll_interval_ms == 0 || orchestrator.job_poll_interval_ms == 0 {
        return invalid("orchestrator poll intervals cannot be 0");
    }
    if orchestrator.attempt_timeout_ms == 0 || orchestrator.inactivity_timeout_ms == 0 {
        return invalid("orchestrator timeouts cannot be 0");
    }
    if orchestrator.stale_claim_ms == 0 {
        return invalid("orchestrator.stale_claim_ms cannot be 0");
    }
    if orchestrator.inactivity_timeout_ms > orchestrator.attempt_timeout_ms {
        return invalid(
            "orchestrator.inactivity_timeout_ms cannot exceed orchestrator.attempt_timeout_ms",
        );
    }

    match config.relay.backend {
        RelayBackend::Dropbox => {
            let Some(dropbox) = &config.relay.dropbox else {
                return invalid("[relay.dropbox] section is required for the dropbox relay");
            };
            if dropbox.access_token.is_none() && !dropbox.can_refresh() {
                return invalid(
                    "relay.dropbox needs access_token or refresh_token with app_key and app_secret",
                );
            }
            if dropbox.chunk_size == 0 || dropbox.chunk_size > MAX_SINGLE_REQUEST_BYTES {
                return invalid("relay.dropbox.chunk_size must be between 1 byte and 150 MiB");
            }
        }
        RelayBackend::Directory => {
            if config.relay.directory.is_none() {
                return invalid("[relay.directory] section is required for the directory relay");
            }
        }
    }

    if config.text.mode == TextMode::LlmFirst && config.text.llm.is_none() {
        return invalid("text.mode = \"llm_first\" requires a [text.llm] section");
    }

    Ok(())
}
