//! Credential extraction from free text.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::llm::{strip_code_fences, CompletionRequest, LlmClient};

/// A principal/secret pair for a target that needs a login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub principal: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Turns a case's credential text into a [`Credentials`] pair.
#[async_trait]
pub trait CredentialParser: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the text holds nothing usable.
    async fn parse(&self, blob: &str) -> Option<Credentials>;
}

const PRINCIPAL_LABELS: &[&str] = &["email", "username", "user", "login"];
const SECRET_LABELS: &[&str] = &["password", "pass", "pwd"];

/// Which field a labelled line fills.
#[derive(Clone, Copy, PartialEq)]
enum Field {
    Principal,
    Secret,
}

/// Split `label: value` (any case, `:` or `-` separator). Returns the field and
/// the possibly empty value.
fn labelled(line: &str) -> Option<(Field, &str)> {
    let (head, value) = line.split_once(':').or_else(|| line.split_once(" - "))?;
    let head = head.trim();
    let field = if PRINCIPAL_LABELS.iter().any(|l| head.eq_ignore_ascii_case(l)) {
        Field::Principal
    } else if SECRET_LABELS.iter().any(|l| head.eq_ignore_ascii_case(l)) {
        Field::Secret
    } else {
        return None;
    };
    Some((field, value.trim()))
}

fn looks_like_email(line: &str) -> bool {
    line.contains('@') && !line.contains(':') && !line.contains(char::is_whitespace)
}

/// Deterministic line-based credential parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCredentialParser;

impl RuleCredentialParser {
    pub fn parse_text(blob: &str) -> Option<Credentials> {
        let lines: Vec<&str> = blob
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return None;
        }

        let mut principal: Option<String> = None;
        let mut secret: Option<String> = None;
        let mut rest: Vec<&str> = Vec::new();
        // A label with its value on the following line.
        let mut pending: Option<Field> = None;
        let mut labels_seen = false;

        for line in &lines {
            if let Some(field) = pending.take() {
                if labelled(line).is_none() {
                    match field {
                        Field::Principal => principal = principal.or(Some(line.to_string())),
                        Field::Secret => secret = secret.or(Some(line.to_string())),
                    }
                    continue;
                }
            }
            match labelled(line) {
                Some((field, "")) => {
                    labels_seen = true;
                    pending = Some(field);
                }
                Some((Field::Principal, value)) => {
                    labels_seen = true;
                    principal = principal.or(Some(value.to_string()));
                }
                Some((Field::Secret, value)) => {
                    labels_seen = true;
                    secret = secret.or(Some(value.to_string()));
                }
                None => rest.push(line),
            }
        }

        if principal.is_none() {
            if let Some(pos) = rest.iter().position(|l| looks_like_email(l)) {
                principal = Some(rest.remove(pos).to_string());
            }
        }

        if labels_seen || principal.is_some() {
            if principal.is_none() && !rest.is_empty() {
                principal = Some(rest.remove(0).to_string());
            }
            if secret.is_none() && !rest.is_empty() {
                secret = Some(rest.remove(0).to_string());
            }
            return principal.map(|p| Credentials::new(p, secret.unwrap_or_default()));
        }

        if rest.len() >= 2 {
            return Some(Credentials::new(rest[0], rest[1]));
        }

        let line = rest[0];
        if !line.contains("://") && !line.contains(char::is_whitespace) {
            if let Some((user, pass)) = line.split_once(':') {
                if !user.is_empty() && !pass.is_empty() {
                    return Some(Credentials::new(user, pass));
                }
            }
        }

        Some(Credentials::new(blob.trim(), ""))
    }
}

#[async_trait]
impl CredentialParser for RuleCredentialParser {
    fn name(&self) -> &str {
        "rules"
    }

    async fn parse(&self, blob: &str) -> Option<Credentials> {
        Self::parse_text(blob)
    }
}

const CREDENTIAL_PROMPT: &str = "You are a credential parser. Extract the username and password \
from the text below. Usernames and passwords may be newline, colon, slash or space separated and \
may be surrounded by notes or links. Keep email addresses whole and preserve special characters \
in passwords exactly.

Return ONLY a JSON object, no markdown and no explanation:
{\"username\": \"...\", \"password\": \"...\"}
Use empty strings for anything not present.

TEXT TO PARSE:
";

#[derive(Debug, Deserialize)]
struct CredentialReply {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Asks an LLM to extract credentials; rules answer whenever it cannot.
pub struct LlmCredentialParser {
    client: Arc<dyn LlmClient>,
}

impl LlmCredentialParser {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    async fn ask(&self, blob: &str) -> Result<Option<Credentials>, String> {
        let request = CompletionRequest::new(format!("{}{}", CREDENTIAL_PROMPT, blob));
        let response = self
            .client
            .complete(request)
            .await
            .map_err(|e| e.to_string())?;
        let reply: CredentialReply = serde_json::from_str(strip_code_fences(&response.text))
            .map_err(|e| format!("unparseable reply: {}", e))?;

        let username = reply.username.trim();
        if username.is_empty() {
            return Ok(None);
        }
        Ok(Some(Credentials::new(username, reply.password.trim())))
    }
}

#[async_trait]
impl CredentialParser for LlmCredentialParser {
    fn name(&self) -> &str {
        "llm"
    }

    async fn parse(&self, blob: &str) -> Option<Credentials> {
        if blob.trim().is_empty() {
            return None;
        }
        match self.ask(blob).await {
            Ok(Some(credentials)) => {
                debug!("Credentials extracted by {}", self.client.provider());
                Some(credentials)
            }
            Ok(None) => RuleCredentialParser::parse_text(blob),
            Err(e) => {
                warn!("LLM credential parsing failed, using rules: {}", e);
                RuleCredentialParser::parse_text(blob)
            }
        }
    }
}
