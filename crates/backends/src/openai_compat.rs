//! OpenAI-compatible backend implementation.
//!
//! Speaks the `/v1/chat/completions` shape used by OpenAI and the many
//! servers that mimic it (vLLM, Ollama, LM Studio, proxies). Both call
//! input forms map onto the messages array; a bare prompt becomes a single
//! user message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use inquest_core::backend::{Backend, BackendRequest, BackendResponse, CallInput, Usage};
use inquest_core::error::BackendError;
use inquest_core::message::{Message, Role};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a new backend handle.
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for proxies or local servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn to_api_messages(input: &CallInput) -> Vec<ApiMessage> {
        match input {
            CallInput::Prompt { prompt } => vec![ApiMessage {
                role: "user".into(),
                content: prompt.clone(),
            }],
            CallInput::Messages { messages } => messages.iter().map(ApiMessage::from).collect(),
        }
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: Self::to_api_messages(&request.input),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(backend = %self.name, model = %request.model, "Backend call");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        backend: self.name.clone(),
                        timeout_secs: DEFAULT_TIMEOUT_SECS,
                    }
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(backend = %self.name, status = %status, "Backend returned error status");
            return Err(match status.as_u16() {
                401 | 403 => BackendError::AuthenticationFailed(text),
                404 => BackendError::ModelNotFound(request.model),
                429 => BackendError::RateLimited { retry_after_secs: 60 },
                code => BackendError::ApiError { status_code: code, message: text },
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::MalformedResponse("no choices in response".into()))?;

        Ok(BackendResponse {
            content: choice.message.content.unwrap_or_default(),
            model: completion.model,
            usage: completion.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            truncated: choice.finish_reason.as_deref() == Some("length"),
        })
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// ── API DTOs ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

impl From<&Message> for ApiMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        ApiMessage { role: role.into(), content: msg.content.clone() }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_becomes_single_user_message() {
        let messages =
            OpenAiCompatBackend::to_api_messages(&CallInput::Prompt { prompt: "hi".into() });
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "hi");
    }

    #[test]
    fn message_roles_map_to_api_strings() {
        let messages = OpenAiCompatBackend::to_api_messages(&CallInput::Messages {
            messages: vec![
                Message::system("rules"),
                Message::user("question"),
                Message::assistant("answer"),
            ],
        });
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend =
            OpenAiCompatBackend::new("local", "key").with_base_url("http://localhost:8080/");
        assert_eq!(backend.base_url, "http://localhost:8080");
    }

    #[test]
    fn completion_response_parses_truncation() {
        let json = r#"{
            "model": "gpt-4o",
            "choices": [{"message": {"content": "partial"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(parsed.usage.as_ref().unwrap().total_tokens, 15);
    }

    #[test]
    fn deferred_capability_is_not_advertised() {
        let backend = OpenAiCompatBackend::new("openai", "key");
        assert!(!backend.capabilities().deferred);
    }
}
