//! Inbound request and outbound response wire shapes.
//!
//! The transport delivers one well-formed [`ToolRequest`] and expects one
//! [`ToolResponse`] or [`ErrorResponse`] per `request_id`. Validation happens
//! here, before any permit is acquired — the cheapest possible failure.

use serde::{Deserialize, Serialize};

use crate::backend::Usage;
use crate::confidence::Confidence;
use crate::error::Error;

/// Maximum serialized size of the `arguments` map, in bytes.
const MAX_ARGUMENTS_BYTES: usize = 262_144;

/// An inbound tool-execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Name of the tool to execute.
    pub tool: String,

    /// Tool arguments as a JSON object.
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,

    /// The session this request belongs to (per-session admission key).
    pub session_id: String,

    /// Caller-supplied correlation ID, echoed on the response.
    pub request_id: String,
}

impl ToolRequest {
    /// Validate shape and bounds. Runs before admission.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tool.trim().is_empty() {
            return Err(Error::Validation {
                field: "tool".into(),
                message: "must not be empty".into(),
            });
        }
        if !self
            .tool
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(Error::Validation {
                field: "tool".into(),
                message: format!("invalid tool name: {}", self.tool),
            });
        }
        if self.session_id.trim().is_empty() {
            return Err(Error::Validation {
                field: "session_id".into(),
                message: "must not be empty".into(),
            });
        }
        if self.request_id.trim().is_empty() {
            return Err(Error::Validation {
                field: "request_id".into(),
                message: "must not be empty".into(),
            });
        }
        let size = serde_json::to_vec(&self.arguments).map(|v| v.len()).unwrap_or(0);
        if size > MAX_ARGUMENTS_BYTES {
            return Err(Error::Validation {
                field: "arguments".into(),
                message: format!("arguments too large: {size} bytes (max {MAX_ARGUMENTS_BYTES})"),
            });
        }
        Ok(())
    }
}

/// Caller-facing arguments for workflow (investigation) tools.
///
/// Parsed out of [`ToolRequest::arguments`]. The first step's content comes
/// from the caller; subsequent steps are driven by the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowArgs {
    /// What the caller wants investigated (or, on continuation, what this
    /// step found).
    pub step: String,

    /// Findings accumulated by the caller so far.
    #[serde(default)]
    pub findings: String,

    /// Caller's estimate of how many steps the investigation needs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps_hint: Option<u32>,

    /// Files examined so far.
    #[serde(default)]
    pub files_checked: Vec<String>,

    /// Files confirmed relevant to the investigation.
    #[serde(default)]
    pub relevant_files: Vec<String>,

    /// Current confidence level.
    #[serde(default)]
    pub confidence: Confidence,

    /// Working hypothesis, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,

    /// Explicit completion signal: false means "no further step required".
    #[serde(default = "default_true")]
    pub next_step_required: bool,

    /// Discard all steps after this one and resume from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrack_from_step: Option<u32>,

    /// Conversation thread to record this run under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Why a workflow run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The caller signalled no further step is required.
    CallerRequested,
    /// The dynamic step budget was exhausted.
    LimitReached,
    /// The stagnation circuit breaker fired.
    StagnationDetected,
    /// The hypothesis was validated at high confidence.
    HypothesisConfirmed,
    /// The overall deadline fired mid-run; partial findings are reported.
    Timeout,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::CallerRequested => "caller_requested",
            StopReason::LimitReached => "limit_reached",
            StopReason::StagnationDetected => "stagnation_detected",
            StopReason::HypothesisConfirmed => "hypothesis_confirmed",
            StopReason::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire status of a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Simple tool executed to completion.
    Complete,
    /// Workflow run handed back to the caller for manual continuation.
    Continuing,
    /// Workflow run reached a stop condition.
    Stopped(StopReason),
}

impl ResponseStatus {
    /// The wire encoding: `complete`, `continuing`, or `stopped_<reason>`.
    pub fn as_wire(self) -> String {
        match self {
            ResponseStatus::Complete => "complete".into(),
            ResponseStatus::Continuing => "continuing".into(),
            ResponseStatus::Stopped(reason) => format!("stopped_{reason}"),
        }
    }
}

impl Serialize for ResponseStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ResponseStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "complete" => Ok(ResponseStatus::Complete),
            "continuing" => Ok(ResponseStatus::Continuing),
            other => {
                let reason = other
                    .strip_prefix("stopped_")
                    .ok_or_else(|| serde::de::Error::custom(format!("unknown status: {other}")))?;
                let reason = match reason {
                    "caller_requested" => StopReason::CallerRequested,
                    "limit_reached" => StopReason::LimitReached,
                    "stagnation_detected" => StopReason::StagnationDetected,
                    "hypothesis_confirmed" => StopReason::HypothesisConfirmed,
                    "timeout" => StopReason::Timeout,
                    other => {
                        return Err(serde::de::Error::custom(format!("unknown stop reason: {other}")));
                    }
                };
                Ok(ResponseStatus::Stopped(reason))
            }
        }
    }
}

/// Result of the final expert analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertAnalysisResult {
    /// The analysis content.
    pub content: String,

    /// Which model produced it.
    pub model: String,

    /// Token usage, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Whether the analysis was cut off at the token limit.
    #[serde(default)]
    pub truncated: bool,
}

/// A successful response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Echo of the request's correlation ID.
    pub request_id: String,

    /// Final status.
    pub status: ResponseStatus,

    /// The step the run finished on (1 for simple tools).
    pub step_number: u32,

    /// Total steps the run planned (equal to `step_number` when stopped).
    pub total_steps: u32,

    /// Final confidence level.
    pub confidence: Confidence,

    /// All retained findings, consolidated.
    pub consolidated_findings: String,

    /// Expert analysis, when the stop policy warranted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_analysis: Option<ExpertAnalysisResult>,

    /// Informational signals surfaced to the caller (e.g. the
    /// low-relevance warning). Never affects status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// A structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error_kind: String,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ErrorResponse {
    /// Build a wire error from a domain error, attaching the structured
    /// detail fields an automated caller needs to decide on retry.
    pub fn from_error(request_id: impl Into<String>, tool_name: &str, err: &Error) -> Self {
        let mut details = serde_json::Map::new();
        details.insert("tool_name".into(), tool_name.into());

        match err {
            Error::Admission(crate::error::AdmissionError::Exhausted {
                pool,
                retry_after_secs,
                current,
                expected,
                ..
            }) => {
                details.insert("pool".into(), pool.as_str().into());
                details.insert("retry_after".into(), (*retry_after_secs).into());
                details.insert("current".into(), (*current).into());
                details.insert("expected".into(), (*expected).into());
            }
            Error::Backend(crate::error::BackendError::RateLimited { retry_after_secs }) => {
                details.insert("retry_after".into(), (*retry_after_secs).into());
            }
            Error::Backend(crate::error::BackendError::Timeout { timeout_secs, .. })
            | Error::Workflow(crate::error::WorkflowError::ExpertTimeout { timeout_secs }) => {
                details.insert("timeout_seconds".into(), (*timeout_secs).into());
            }
            Error::Workflow(crate::error::WorkflowError::DeadlineExceeded {
                step_number,
                elapsed_secs,
                ..
            }) => {
                details.insert("step_number".into(), (*step_number).into());
                details.insert("timeout_seconds".into(), (*elapsed_secs).into());
            }
            _ => {}
        }

        Self {
            request_id: request_id.into(),
            error_kind: err.kind().into(),
            message: err.to_string(),
            details,
        }
    }
}
