//! Error types for the inquest domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all inquest operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Admission errors ---
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Workflow errors ---
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Validation (rejected before admission) ---
    #[error("Validation error: {field} — {message}")]
    Validation { field: String, message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The wire-level `error_kind` string for this error.
    ///
    /// Automated callers use this to decide whether to retry, back off,
    /// or surface to a human.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Admission(AdmissionError::Exhausted { .. }) => "exhausted",
            Error::Admission(_) => "admission_error",
            Error::Backend(BackendError::Timeout { .. }) => "timeout",
            Error::Backend(_) => "backend_error",
            Error::Workflow(WorkflowError::ExpertTimeout { .. }) => "timeout",
            Error::Workflow(WorkflowError::DeadlineExceeded { .. }) => "timeout",
            Error::Workflow(_) => "workflow_error",
            Error::Storage(_) => "storage_error",
            Error::Tool(ToolError::InvalidArguments(_)) => "validation_error",
            Error::Tool(ToolError::NotFound(_)) => "validation_error",
            Error::Tool(_) => "tool_error",
            Error::Validation { .. } => "validation_error",
            Error::Serialization(_) => "validation_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether a client should retry this request after backing off.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::Admission(AdmissionError::Exhausted { .. })
                | Error::Backend(BackendError::RateLimited { .. })
        )
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// A permit could not be acquired within the wait deadline.
    ///
    /// Carries enough detail for the caller to back off intelligently.
    #[error(
        "Permit pool '{pool}' exhausted after {waited_secs}s wait \
         (current: {current}, expected: {expected}), retry after {retry_after_secs}s"
    )]
    Exhausted {
        pool: String,
        waited_secs: u64,
        retry_after_secs: u64,
        current: i64,
        expected: i64,
    },

    #[error("Unknown backend pool: {0}")]
    UnknownBackend(String),

    #[error("Permit pool '{0}' is closed")]
    PoolClosed(String),
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Backend '{backend}' timed out after {timeout_secs}s")]
    Timeout { backend: String, timeout_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// The overall request deadline fired mid-step. Steps appended so far
    /// are preserved and reported with the partial result.
    #[error("Workflow '{tool_name}' exceeded deadline after {elapsed_secs}s at step {step_number}")]
    DeadlineExceeded {
        tool_name: String,
        step_number: u32,
        elapsed_secs: u64,
    },

    /// The expert analysis call exceeded its hard deadline. Distinct from a
    /// backend error: the backend never answered at all.
    #[error("Expert analysis timed out after {timeout_secs}s")]
    ExpertTimeout { timeout_secs: u64 },

    #[error("Run '{0}' is already terminal")]
    RunTerminal(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
