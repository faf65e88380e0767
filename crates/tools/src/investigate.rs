//! Investigate tool — deep root-cause analysis workflow.

use async_trait::async_trait;
use std::sync::Arc;

use inquest_core::backend::{Backend, BackendRequest, CallInput};
use inquest_core::error::ToolError;
use inquest_core::message::Message;
use inquest_core::tool::{StepContext, StepOutput, ToolComplexity, WorkflowTool};

use crate::step_response::{STEP_RESPONSE_FORMAT, parse_step_response};

const DEFAULT_MODEL: &str = "gpt-4o";

/// Multi-step root-cause investigation.
pub struct InvestigateTool {
    model: String,
}

impl InvestigateTool {
    pub fn new() -> Self {
        Self { model: DEFAULT_MODEL.into() }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn step_prompt(ctx: &StepContext) -> String {
        let mut prompt = format!(
            "Investigation step {} for run {}.\n\nInstructions: {}\n",
            ctx.step_number, ctx.run_id, ctx.instructions
        );
        if !ctx.consolidated_findings.is_empty() {
            prompt.push_str(&format!("\nFindings so far:\n{}\n", ctx.consolidated_findings));
        }
        if let Some(hypothesis) = &ctx.hypothesis {
            prompt.push_str(&format!("\nWorking hypothesis: {hypothesis}\n"));
        }
        if !ctx.relevant_files.is_empty() {
            prompt.push_str(&format!(
                "\nFiles marked relevant so far: {}\n",
                ctx.relevant_files.join(", ")
            ));
        }
        prompt.push_str("\n");
        prompt.push_str(STEP_RESPONSE_FORMAT);
        prompt
    }
}

impl Default for InvestigateTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowTool for InvestigateTool {
    fn name(&self) -> &str {
        "investigate"
    }

    fn description(&self) -> &str {
        "Multi-step root-cause investigation with confidence tracking"
    }

    fn complexity(&self) -> ToolComplexity {
        ToolComplexity::Complex
    }

    fn expert_system_prompt(&self) -> String {
        "You are a senior engineer reviewing a completed root-cause investigation. \
         Evaluate whether the evidence actually supports the conclusion, name any \
         alternative explanations that were not ruled out, and state the most likely \
         root cause plainly."
            .into()
    }

    async fn execute_step(
        &self,
        ctx: &StepContext,
        backend: Arc<dyn Backend>,
    ) -> Result<StepOutput, ToolError> {
        let response = backend
            .call(BackendRequest {
                model: self.model.clone(),
                input: CallInput::Messages {
                    messages: vec![
                        Message::system(
                            "You are performing one step of a systematic root-cause \
                             investigation. Be concrete: name files, symbols, and the \
                             evidence behind every claim.",
                        ),
                        Message::user(Self::step_prompt(ctx)),
                    ],
                },
                temperature: 0.2,
                max_tokens: None,
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "investigate".into(),
                reason: e.to_string(),
            })?;

        Ok(parse_step_response(&response.content))
    }
}
