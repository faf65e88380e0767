//! Tool traits — the abstraction over executable capabilities.
//!
//! Two kinds of tool exist:
//! - **Simple tools** execute one unit of work and return.
//! - **Workflow tools** are driven by the orchestration engine through a
//!   multi-step, confidence-gated loop.
//!
//! Both are registered in the [`ToolRegistry`] and dispatched by name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::Backend;
use crate::confidence::Confidence;
use crate::error::ToolError;

/// Declared complexity class of a tool.
///
/// Plain data consumed by the step evaluator's dynamic limit computation —
/// no dispatch happens through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolComplexity {
    Simple,
    Medium,
    Complex,
}

impl ToolComplexity {
    /// The base step ceiling before hint and file-count adjustments.
    pub fn base_step_limit(self) -> u32 {
        match self {
            ToolComplexity::Simple => 8,
            ToolComplexity::Medium => 12,
            ToolComplexity::Complex => 16,
        }
    }
}

/// The output of a simple tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The result content.
    pub content: String,

    /// Which model was involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A single-shot tool: one admitted execution, one result.
#[async_trait]
pub trait SimpleTool: Send + Sync {
    /// The unique name of this tool (e.g., "chat").
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// Execute with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
        backend: Arc<dyn Backend>,
    ) -> std::result::Result<ToolOutput, ToolError>;
}

/// Context handed to a workflow tool for one step.
///
/// Built by the orchestration engine; the tool never sees the run itself.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The run this step belongs to.
    pub run_id: String,

    /// The tool being executed.
    pub tool_name: String,

    /// 1-based step number.
    pub step_number: u32,

    /// Engine-generated guidance for this step (empty on the first step,
    /// where the caller's own step content drives the work).
    pub instructions: String,

    /// Everything retained steps have found so far.
    pub consolidated_findings: String,

    /// Current working hypothesis.
    pub hypothesis: Option<String>,

    /// Files confirmed relevant so far.
    pub relevant_files: Vec<String>,
}

/// What one step of a workflow tool produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    /// Findings from this step.
    pub findings: String,

    /// Files examined during this step.
    #[serde(default)]
    pub files_checked: Vec<String>,

    /// Files confirmed relevant during this step.
    #[serde(default)]
    pub relevant_files: Vec<String>,

    /// Confidence after this step.
    pub confidence: Confidence,

    /// Updated hypothesis, if the step formed or refined one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,

    /// Whether the tool believes more steps are needed.
    #[serde(default = "default_true")]
    pub next_step_required: bool,
}

fn default_true() -> bool {
    true
}

/// A multi-step investigation tool driven by the orchestration engine.
#[async_trait]
pub trait WorkflowTool: Send + Sync {
    /// The unique name of this tool (e.g., "investigate").
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// Declared complexity class; feeds the dynamic step limit.
    fn complexity(&self) -> ToolComplexity;

    /// System framing for the final expert analysis call.
    fn expert_system_prompt(&self) -> String {
        format!(
            "You are a senior engineer reviewing the findings of a completed \
             '{}' investigation. Assess the evidence, identify gaps, and state \
             your conclusion plainly.",
            self.name()
        )
    }

    /// Execute the tool-specific unit of work for one step.
    async fn execute_step(
        &self,
        ctx: &StepContext,
        backend: Arc<dyn Backend>,
    ) -> std::result::Result<StepOutput, ToolError>;
}

/// A registered tool, either kind.
#[derive(Clone)]
pub enum RegisteredTool {
    Simple(Arc<dyn SimpleTool>),
    Workflow(Arc<dyn WorkflowTool>),
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        match self {
            RegisteredTool::Simple(t) => t.name(),
            RegisteredTool::Workflow(t) => t.name(),
        }
    }

    pub fn info(&self) -> ToolInfo {
        match self {
            RegisteredTool::Simple(t) => ToolInfo {
                name: t.name().into(),
                description: t.description().into(),
                complexity: ToolComplexity::Simple,
                workflow: false,
            },
            RegisteredTool::Workflow(t) => ToolInfo {
                name: t.name().into(),
                description: t.description().into(),
                complexity: t.complexity(),
                workflow: true,
            },
        }
    }
}

/// Summary of a registered tool, served on the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub complexity: ToolComplexity,
    pub workflow: bool,
}

/// A registry of available tools, dispatched by name.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a simple tool. Replaces any existing tool with the same name.
    pub fn register_simple(&mut self, tool: Arc<dyn SimpleTool>) {
        self.tools.insert(tool.name().to_string(), RegisteredTool::Simple(tool));
    }

    /// Register a workflow tool. Replaces any existing tool with the same name.
    pub fn register_workflow(&mut self, tool: Arc<dyn WorkflowTool>) {
        self.tools.insert(tool.name().to_string(), RegisteredTool::Workflow(tool));
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Look up a tool, erroring with `NotFound` when absent.
    pub fn require(&self, name: &str) -> std::result::Result<&RegisteredTool, ToolError> {
        self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.into()))
    }

    /// Summaries of all registered tools.
    pub fn infos(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self.tools.values().map(|t| t.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
