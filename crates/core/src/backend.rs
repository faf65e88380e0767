//! Backend trait — the abstraction over model backends.
//!
//! A Backend knows how to send a request to a model API and get a response
//! back. The daemon calls it through this narrow interface and never sees
//! the wire format underneath.
//!
//! Deferred (asynchronous-capable) execution is opt-in: implementations
//! advertise it through [`Backend::capabilities`], which must be answerable
//! without making a network call. Callers probe first, then pick a branch —
//! error types are never used to signal "wrong call shape".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::message::Message;

/// The input form for a backend call.
///
/// The expert analysis dispatcher selects the form per call; backends must
/// accept both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum CallInput {
    /// A structured message sequence (system + user turns).
    Messages { messages: Vec<Message> },
    /// A single pre-formatted prompt.
    Prompt { prompt: String },
}

impl CallInput {
    /// Flatten to plain text, whichever form this is.
    pub fn as_text(&self) -> String {
        match self {
            CallInput::Prompt { prompt } => prompt.clone(),
            CallInput::Messages { messages } => messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// A request to a model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// The model to use (e.g., "gpt-4o", "o3-pro")
    pub model: String,

    /// The call input (messages or a single prompt)
    pub input: CallInput,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

/// A complete response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// The generated content
    pub content: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Whether the output was cut off at the token limit
    #[serde(default)]
    pub truncated: bool,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// What a backend handle can do, answerable without invoking a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Supports deferred (submit-then-poll) execution via
    /// [`Backend::call_deferred`].
    pub deferred: bool,
}

/// The core Backend trait.
///
/// Every model backend implements this. The orchestration engine and the
/// expert analysis dispatcher call `call()` (or `call_deferred()` after a
/// capability probe) without knowing which backend is underneath.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g., "openai", "local").
    fn name(&self) -> &str;

    /// Capability probe. Must not perform I/O.
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// Send a request and wait for the complete response.
    async fn call(&self, request: BackendRequest) -> std::result::Result<BackendResponse, BackendError>;

    /// Deferred execution: submit the request and poll for the result.
    ///
    /// Only valid when `capabilities().deferred` is true. The default
    /// implementation reflects a handle that never advertises the
    /// capability.
    async fn call_deferred(
        &self,
        _request: BackendRequest,
    ) -> std::result::Result<BackendResponse, BackendError> {
        Err(BackendError::NotConfigured(format!(
            "Backend '{}' does not support deferred execution",
            self.name()
        )))
    }

    /// Health check — can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, BackendError> {
        Ok(true)
    }
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_input_as_text_joins_messages() {
        let input = CallInput::Messages {
            messages: vec![Message::system("rules"), Message::user("findings")],
        };
        let text = input.as_text();
        assert!(text.contains("rules"));
        assert!(text.contains("findings"));
    }

    #[test]
    fn call_input_serde_tagged() {
        let input = CallInput::Prompt { prompt: "analyze this".into() };
        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains("\"form\":\"prompt\""));
    }

    #[test]
    fn default_capabilities_not_deferred() {
        assert!(!BackendCapabilities::default().deferred);
    }
}
