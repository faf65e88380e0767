//! The request dispatch pipeline.
//!
//! validate → coalesce → (leader only: admit → execute) → respond.
//!
//! Validation runs before anything else — a malformed request never costs a
//! permit. The coalescer dedupes before admission so that N identical
//! callers hold one set of permits, not N; the leader acquires
//! Global → Backend → Session and every waiter shares its result.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use inquest_coalesce::Fingerprint;
use inquest_core::backend::Backend;
use inquest_core::confidence::Confidence;
use inquest_core::error::{Error, ToolError, WorkflowError};
use inquest_core::message::Role;
use inquest_core::request::{ResponseStatus, ToolRequest, ToolResponse, WorkflowArgs};
use inquest_core::storage::Turn;
use inquest_core::tool::{RegisteredTool, SimpleTool, WorkflowTool};

use crate::SharedState;

/// What the coalescer shares between identical callers. `Arc<Error>`
/// because every waiter receives the same failure.
pub type DispatchResult = Result<ToolResponse, Arc<Error>>;

/// Execute one inbound request end to end.
pub async fn execute(state: &SharedState, request: ToolRequest) -> Result<ToolResponse, Error> {
    request.validate()?;

    // Resolve tool and backend before spending anything.
    let tool = match state.tools.get(&request.tool) {
        Some(tool) => tool.clone(),
        None => return Err(Error::Tool(ToolError::NotFound(request.tool))),
    };
    let named_backend = request.arguments.get("backend").and_then(|v| v.as_str());
    let backend_name = named_backend.unwrap_or(&state.config.default_backend).to_string();
    let backend = match state.backends.require(&backend_name) {
        Ok(backend) => backend,
        // A caller naming a nonexistent backend is a bad argument, not a
        // backend failure.
        Err(e) if named_backend.is_some() => {
            return Err(Error::Validation { field: "backend".into(), message: e.to_string() });
        }
        Err(e) => return Err(e.into()),
    };

    let fingerprint = Fingerprint::compute(&request.tool, &request.arguments);
    let request_id = request.request_id.clone();

    let shared = state
        .coalescer
        .submit(fingerprint, admitted_execute(state, request, tool, backend_name, backend))
        .await;

    match shared {
        Ok(mut response) => {
            // Waiters echo their own correlation ID, not the leader's.
            response.request_id = request_id;
            Ok(response)
        }
        Err(err) => Err(clone_error(&err)),
    }
}

/// The leader's path: acquire permits, run the tool, record the result.
async fn admitted_execute(
    state: &SharedState,
    request: ToolRequest,
    tool: RegisteredTool,
    backend_name: String,
    backend: Arc<dyn Backend>,
) -> DispatchResult {
    let mut lease = state
        .admission
        .acquire(Some(&backend_name), Some(&request.session_id))
        .await
        .map_err(|e| Arc::new(Error::Admission(e)))?;

    debug!(
        request_id = %request.request_id,
        tool = %request.tool,
        backend = %backend_name,
        "Executing admitted request"
    );

    let result = match &tool {
        RegisteredTool::Simple(simple) => {
            run_simple(state, &request, simple.as_ref(), backend).await
        }
        RegisteredTool::Workflow(workflow) => {
            run_workflow(state, &request, workflow.clone(), backend).await
        }
    };

    // Release permits before notifying waiters; explicit, though drop
    // would do the same on every path.
    lease.release();

    match result {
        Ok(response) => {
            record_result(state, &request, &response).await;
            Ok(response)
        }
        Err(err) => Err(Arc::new(err)),
    }
}

async fn run_simple(
    state: &SharedState,
    request: &ToolRequest,
    tool: &dyn SimpleTool,
    backend: Arc<dyn Backend>,
) -> Result<ToolResponse, Error> {
    let deadline = Duration::from_secs(state.config.workflow.request_deadline_secs);
    let started = std::time::Instant::now();

    let output = tokio::time::timeout(deadline, tool.execute(request.arguments.clone(), backend))
        .await
        .map_err(|_| {
            Error::Workflow(WorkflowError::DeadlineExceeded {
                tool_name: request.tool.clone(),
                step_number: 1,
                elapsed_secs: started.elapsed().as_secs(),
            })
        })??;

    Ok(ToolResponse {
        request_id: request.request_id.clone(),
        status: ResponseStatus::Complete,
        step_number: 1,
        total_steps: 1,
        confidence: Confidence::Certain,
        consolidated_findings: output.content,
        expert_analysis: None,
        notes: Vec::new(),
    })
}

async fn run_workflow(
    state: &SharedState,
    request: &ToolRequest,
    tool: Arc<dyn WorkflowTool>,
    backend: Arc<dyn Backend>,
) -> Result<ToolResponse, Error> {
    let args: WorkflowArgs =
        serde_json::from_value(serde_json::Value::Object(request.arguments.clone())).map_err(
            |e| Error::Validation { field: "arguments".into(), message: e.to_string() },
        )?;

    let outcome = state.engine.execute(tool, args, backend).await?;

    Ok(ToolResponse {
        request_id: request.request_id.clone(),
        status: outcome.status,
        step_number: outcome.run.current_step_number(),
        total_steps: outcome.total_steps,
        confidence: outcome.run.confidence,
        consolidated_findings: outcome.run.consolidated_findings(),
        expert_analysis: outcome.expert_analysis,
        notes: outcome.notes,
    })
}

/// Record the exchange in conversation storage. Turn IDs derive from the
/// request ID, so redelivered requests store once.
async fn record_result(state: &SharedState, request: &ToolRequest, response: &ToolResponse) {
    let thread_id = request
        .arguments
        .get("continuation_id")
        .and_then(|v| v.as_str())
        .unwrap_or(&request.session_id)
        .to_string();

    let request_turn = Turn::with_id(
        format!("{}:request", request.request_id),
        Role::User,
        format!("[{}] {}", request.tool, summarize_arguments(&request.arguments)),
    );
    let result_turn = Turn::with_id(
        format!("{}:result", request.request_id),
        Role::Assistant,
        response.consolidated_findings.clone(),
    );

    for turn in [request_turn, result_turn] {
        if let Err(e) = state.store.append(&thread_id, turn).await {
            debug!(thread = %thread_id, error = %e, "Failed to record turn");
        }
    }
}

fn summarize_arguments(arguments: &serde_json::Map<String, serde_json::Value>) -> String {
    arguments
        .get("step")
        .or_else(|| arguments.get("prompt"))
        .and_then(|v| v.as_str())
        .unwrap_or("(no prompt)")
        .chars()
        .take(200)
        .collect()
}

/// Rebuild an owned error from the shared one for this caller's response.
fn clone_error(err: &Error) -> Error {
    match err {
        Error::Admission(e) => Error::Admission(e.clone()),
        Error::Backend(e) => Error::Backend(e.clone()),
        Error::Workflow(e) => Error::Workflow(e.clone()),
        Error::Storage(e) => Error::Storage(e.clone()),
        Error::Tool(e) => Error::Tool(e.clone()),
        Error::Validation { field, message } => {
            Error::Validation { field: field.clone(), message: message.clone() }
        }
        other => Error::Internal(other.to_string()),
    }
}
