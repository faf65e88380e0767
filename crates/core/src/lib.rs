//! # Inquest Core
//!
//! Domain types, traits, and error definitions for the inquest tool-execution
//! daemon. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod backend;
pub mod confidence;
pub mod error;
pub mod message;
pub mod request;
pub mod storage;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use backend::{Backend, BackendCapabilities, BackendRequest, BackendResponse, CallInput, Usage};
pub use confidence::Confidence;
pub use error::{AdmissionError, BackendError, Error, Result, StorageError, ToolError, WorkflowError};
pub use message::{Message, Role};
pub use request::{
    ErrorResponse, ExpertAnalysisResult, StopReason, ToolRequest, ToolResponse, WorkflowArgs,
};
pub use storage::{ConversationStore, Turn};
pub use tool::{
    SimpleTool, StepContext, StepOutput, ToolComplexity, ToolInfo, ToolOutput, ToolRegistry,
    WorkflowTool,
};
