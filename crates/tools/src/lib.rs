//! Built-in tools.
//!
//! One simple tool (`chat`) and two workflow tools (`investigate`,
//! `review`). Workflow tools share a structured step-response format that
//! the backend is asked to produce and [`step_response`] parses.

mod chat;
mod investigate;
mod review;
mod step_response;

pub use chat::ChatTool;
pub use investigate::InvestigateTool;
pub use review::ReviewTool;

use std::sync::Arc;

use inquest_core::tool::ToolRegistry;

/// Build the default registry with every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_simple(Arc::new(ChatTool::new()));
    registry.register_workflow(Arc::new(InvestigateTool::new()));
    registry.register_workflow(Arc::new(ReviewTool::new()));
    registry
}
