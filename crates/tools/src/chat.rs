//! Chat tool — a single backend call, no step loop.

use async_trait::async_trait;
use std::sync::Arc;

use inquest_core::backend::{Backend, BackendRequest, CallInput};
use inquest_core::error::ToolError;
use inquest_core::tool::{SimpleTool, ToolOutput};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// One-shot conversational tool.
pub struct ChatTool {
    default_model: String,
}

impl ChatTool {
    pub fn new() -> Self {
        Self { default_model: DEFAULT_MODEL.into() }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

impl Default for ChatTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimpleTool for ChatTool {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "Send a prompt to a model backend and return its reply"
    }

    async fn execute(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
        backend: Arc<dyn Backend>,
    ) -> Result<ToolOutput, ToolError> {
        let prompt = arguments
            .get("prompt")
            .and_then(|v| v.as_str())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("'prompt' is required".into()))?;

        let model = arguments
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.default_model)
            .to_string();

        let response = backend
            .call(BackendRequest {
                model,
                input: CallInput::Prompt { prompt: prompt.to_string() },
                temperature: 0.7,
                max_tokens: None,
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "chat".into(),
                reason: e.to_string(),
            })?;

        Ok(ToolOutput {
            content: response.content,
            model: Some(response.model),
        })
    }
}
