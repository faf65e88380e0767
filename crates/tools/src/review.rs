//! Review tool — staged code review workflow.

use async_trait::async_trait;
use std::sync::Arc;

use inquest_core::backend::{Backend, BackendRequest, CallInput};
use inquest_core::error::ToolError;
use inquest_core::message::Message;
use inquest_core::tool::{StepContext, StepOutput, ToolComplexity, WorkflowTool};

use crate::step_response::{STEP_RESPONSE_FORMAT, parse_step_response};

const DEFAULT_MODEL: &str = "gpt-4o";

/// Multi-step code review: correctness first, then robustness, then style.
pub struct ReviewTool {
    model: String,
}

impl ReviewTool {
    pub fn new() -> Self {
        Self { model: DEFAULT_MODEL.into() }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Review lens for a given step: earlier steps hunt for defects,
    /// later ones sweep for polish.
    fn lens(step_number: u32) -> &'static str {
        match step_number {
            0 | 1 | 2 => "correctness: logic errors, unhandled failure paths, unsound concurrency",
            3 | 4 => "robustness: resource handling, timeouts, input validation, error propagation",
            _ => "maintainability: naming, duplication, API clarity, test coverage gaps",
        }
    }
}

impl Default for ReviewTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowTool for ReviewTool {
    fn name(&self) -> &str {
        "review"
    }

    fn description(&self) -> &str {
        "Staged code review across correctness, robustness, and maintainability"
    }

    fn complexity(&self) -> ToolComplexity {
        ToolComplexity::Medium
    }

    fn expert_system_prompt(&self) -> String {
        "You are a principal engineer giving the final verdict on a staged code \
         review. Rank the confirmed issues by severity, drop anything speculative, \
         and say whether the change is safe to merge."
            .into()
    }

    async fn execute_step(
        &self,
        ctx: &StepContext,
        backend: Arc<dyn Backend>,
    ) -> Result<StepOutput, ToolError> {
        let mut prompt = format!(
            "Review step {}. Focus this pass on {}.\n\nInstructions: {}\n",
            ctx.step_number,
            Self::lens(ctx.step_number),
            ctx.instructions
        );
        if !ctx.consolidated_findings.is_empty() {
            prompt.push_str(&format!("\nIssues found so far:\n{}\n", ctx.consolidated_findings));
        }
        if !ctx.relevant_files.is_empty() {
            prompt.push_str(&format!("\nFiles under review: {}\n", ctx.relevant_files.join(", ")));
        }
        prompt.push_str("\n");
        prompt.push_str(STEP_RESPONSE_FORMAT);

        let response = backend
            .call(BackendRequest {
                model: self.model.clone(),
                input: CallInput::Messages {
                    messages: vec![
                        Message::system(
                            "You are performing one pass of a staged code review. Report \
                             only issues you can point at concretely; no style nitpicks \
                             during correctness passes.",
                        ),
                        Message::user(prompt),
                    ],
                },
                temperature: 0.2,
                max_tokens: None,
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "review".into(),
                reason: e.to_string(),
            })?;

        Ok(parse_step_response(&response.content))
    }
}
