//! Content safety gate
//!
//! Classifies one contribution as safe or not before it is stored. An
//! unsafe verdict is a normal outcome; only a failure to reach the
//! classifier is an error, and [`SafetyFailurePolicy`] decides what the
//! intake does with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::llm::{extract_json_object, AnthropicClient, LlmError};

const UNABLE_TO_EVALUATE: &str = "Unable to evaluate content";
const NOT_APPROPRIATE: &str = "Content may not be appropriate for this platform";
const SAFETY_MAX_TOKENS: u32 = 100;

/// Classifier verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            safe: true,
            reason: None,
        }
    }

    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason.into()),
        }
    }
}

/// The classifier could not be consulted
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("Safety service unavailable: {0}")]
    Unavailable(String),

    #[error("Safety check timed out after {0:?}")]
    Timeout(Duration),
}

/// What the intake does when the gate errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFailurePolicy {
    /// Reject the request as retryable; nothing is stored
    #[default]
    FailClosed,
    /// Treat the content as safe
    FailOpen,
}

#[async_trait]
pub trait ContentSafetyGate: Send + Sync {
    /// Must return `Ok` for merely unsafe content
    async fn check(&self, content: &str) -> Result<SafetyVerdict, SafetyError>;
}

/// Gate backed by a Claude model
pub struct ClaudeSafetyGate {
    client: AnthropicClient,
    model: String,
    timeout: Duration,
}

impl ClaudeSafetyGate {
    pub fn new(client: AnthropicClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ContentSafetyGate for ClaudeSafetyGate {
    async fn check(&self, content: &str) -> Result<SafetyVerdict, SafetyError> {
        match self
            .client
            .complete(&self.model, &safety_prompt(content), SAFETY_MAX_TOKENS, self.timeout)
            .await
        {
            Ok(text) => Ok(parse_safety_response(&text)),
            Err(LlmError::EmptyResponse) => Ok(SafetyVerdict::unsafe_because(UNABLE_TO_EVALUATE)),
            Err(LlmError::Timeout(after)) => Err(SafetyError::Timeout(after)),
            Err(e) => Err(SafetyError::Unavailable(e.to_string())),
        }
    }
}

pub fn safety_prompt(content: &str) -> String {
    format!(
        "Evaluate if this contribution to a problem-solving platform is appropriate. \
It should be helpful, not harmful, abusive, spam, or off-topic.\n\n\
Content: \"{}\"\n\n\
Respond in this exact JSON format:\n\
{{\"safe\": true}} or {{\"safe\": false, \"reason\": \"brief explanation\"}}",
        content
    )
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    safe: serde_json::Value,
    #[serde(default)]
    reason: Option<String>,
}

/// Interpret the classifier's reply
///
/// A JSON object wins; only a literal `true` counts as safe. Otherwise a
/// bare SAFE / UNSAFE keyword is honoured. Anything else is flagged.
pub fn parse_safety_response(text: &str) -> SafetyVerdict {
    let text = text.trim();

    if let Some(json) = extract_json_object(text) {
        match serde_json::from_str::<RawVerdict>(json) {
            Ok(raw) => {
                return if raw.safe == serde_json::Value::Bool(true) {
                    SafetyVerdict {
                        safe: true,
                        reason: raw.reason,
                    }
                } else {
                    SafetyVerdict {
                        safe: false,
                        reason: Some(raw.reason.unwrap_or_else(|| NOT_APPROPRIATE.to_string())),
                    }
                };
            }
            Err(e) => warn!("Safety reply was not valid JSON, falling back to keywords: {}", e),
        }
    }

    let upper = text.to_uppercase();
    if upper.contains("UNSAFE") {
        SafetyVerdict::unsafe_because(NOT_APPROPRIATE)
    } else if upper.contains("SAFE") {
        SafetyVerdict::safe()
    } else {
        SafetyVerdict::unsafe_because(UNABLE_TO_EVALUATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_safe() {
        assert_eq!(parse_safety_response("{\"safe\": true}"), SafetyVerdict::safe());
    }

    #[test]
    fn test_parse_json_unsafe_with_reason() {
        let verdict = parse_safety_response("```json\n{\"safe\": false, \"reason\": \"spam\"}\n```");
        assert!(!verdict.safe);
        assert_eq!(verdict.reason.as_deref(), Some("spam"));
    }

    #[test]
    fn test_parse_truthy_non_bool_is_not_safe() {
        let verdict = parse_safety_response("{\"safe\": \"yes\"}");
        assert!(!verdict.safe);
    }

    #[test]
    fn test_keyword_fallback() {
        assert!(parse_safety_response("SAFE").safe);
        assert!(!parse_safety_response("This is UNSAFE").safe);
    }

    #[test]
    fn test_unintelligible_reply_is_flagged() {
        let verdict = parse_safety_response("I cannot help with that");
        assert!(!verdict.safe);
        assert_eq!(verdict.reason.as_deref(), Some(UNABLE_TO_EVALUATE));
    }

    #[test]
    fn test_prompt_embeds_content() {
        let prompt = safety_prompt("try a walk outside");
        assert!(prompt.contains("Content: \"try a walk outside\""));
        assert!(prompt.contains("{\"safe\": true}"));
    }

    #[test]
    fn test_policy_defaults_to_fail_closed() {
        assert_eq!(SafetyFailurePolicy::default(), SafetyFailurePolicy::FailClosed);
        let parsed: SafetyFailurePolicy = serde_json::from_str("\"fail_open\"").unwrap();
        assert_eq!(parsed, SafetyFailurePolicy::FailOpen);
    }
}
