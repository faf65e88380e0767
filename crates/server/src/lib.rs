//! HTTP transport for the inquest daemon.
//!
//! Endpoints:
//!
//! - `POST /v1/execute` — Execute a tool (simple or workflow)
//! - `GET  /v1/health`  — Admission pool health for external polling
//! - `GET  /v1/status`  — Daemon status: uptime, tools, backends
//!
//! Built on Axum. One well-formed request in, one well-formed response or
//! structured error out, per `request_id`.

mod dispatch;

pub use dispatch::DispatchResult;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::Serialize;
use tracing::{error, info};

use inquest_admission::{AdmissionController, HealthMonitor};
use inquest_backends::BackendRegistry;
use inquest_coalesce::RequestCoalescer;
use inquest_config::{AppConfig, ConfigError};
use inquest_core::error::Error;
use inquest_core::request::{ErrorResponse, ToolRequest};
use inquest_core::storage::ConversationStore;
use inquest_core::tool::ToolRegistry;
use inquest_storage::MemoryConversationStore;
use inquest_workflow::{ExpertAnalysisDispatcher, OrchestrationEngine};

/// Shared state for the daemon.
pub struct DaemonState {
    pub config: AppConfig,
    pub admission: Arc<AdmissionController>,
    pub coalescer: RequestCoalescer<DispatchResult>,
    pub engine: OrchestrationEngine,
    pub tools: ToolRegistry,
    pub backends: BackendRegistry,
    pub store: Arc<dyn ConversationStore>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<DaemonState>;

impl DaemonState {
    /// Wire up the daemon from its parts. Fails fast on configurations
    /// that could never serve a request.
    pub fn new(
        config: AppConfig,
        backends: BackendRegistry,
        tools: ToolRegistry,
        store: Arc<dyn ConversationStore>,
    ) -> Result<SharedState, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one backend must be configured".into(),
            ));
        }
        if !backends.names().contains(&config.default_backend.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "default_backend '{}' is not a configured backend",
                config.default_backend
            )));
        }

        let expert_backend = match backends.get(&config.expert.backend) {
            Some(backend) => backend,
            None if config.expert.enabled => {
                return Err(ConfigError::Invalid(format!(
                    "expert.backend '{}' is not a configured backend",
                    config.expert.backend
                )));
            }
            // Dispatcher is constructed but never invoked when disabled;
            // any configured handle satisfies the constructor.
            None => backends.get(&config.default_backend).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "default_backend '{}' is not a configured backend",
                    config.default_backend
                ))
            })?,
        };

        let capacities: HashMap<String, u32> = backends
            .names()
            .iter()
            .map(|name| (name.to_string(), config.backend_capacity(name)))
            .collect();
        let admission = Arc::new(AdmissionController::new(&config.admission, capacities));

        let expert = ExpertAnalysisDispatcher::new(
            config.expert.clone(),
            expert_backend,
            admission.clone(),
        );
        let engine = OrchestrationEngine::new(&config.workflow, expert);
        let coalescer = RequestCoalescer::new(&config.coalescer);

        Ok(Arc::new(Self {
            config,
            admission,
            coalescer,
            engine,
            tools,
            backends,
            store,
            start_time: chrono::Utc::now(),
        }))
    }
}

/// Build the Axum router with all daemon routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/execute", post(execute_handler))
        .route("/v1/health", get(health_handler))
        .route("/v1/status", get(status_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the daemon: health monitor plus HTTP server, until ctrl-c.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let backends = BackendRegistry::from_config(&config);
    let tools = inquest_tools::builtin_registry();
    let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let health_interval = Duration::from_secs(config.admission.health_interval_secs);

    let state = DaemonState::new(config, backends, tools, store)?;

    let monitor = HealthMonitor::new(state.admission.clone(), health_interval).spawn();

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "inquest daemon listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    monitor.abort();
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn execute_handler(
    State(state): State<SharedState>,
    Json(request): Json<ToolRequest>,
) -> impl IntoResponse {
    let request_id = request.request_id.clone();
    let tool_name = request.tool.clone();

    match dispatch::execute(&state, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!(request_id = %request_id, tool = %tool_name, error = %err, "Request failed");
            let status = error_status(&err);
            let body = ErrorResponse::from_error(request_id, &tool_name, &err);
            (status, Json(body)).into_response()
        }
    }
}

/// Map the error taxonomy onto transport status codes.
fn error_status(err: &Error) -> StatusCode {
    use inquest_core::error::ToolError;
    match err {
        Error::Tool(ToolError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => match err.kind() {
            "validation_error" => StatusCode::BAD_REQUEST,
            "exhausted" => StatusCode::SERVICE_UNAVAILABLE,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            "backend_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = inquest_admission::snapshot(&state.admission).await;
    Json(snapshot)
}

#[derive(Serialize)]
struct StatusResponse {
    name: &'static str,
    version: &'static str,
    uptime_secs: i64,
    tools: Vec<inquest_core::tool::ToolInfo>,
    backends: Vec<String>,
    active_sessions: usize,
    stored_threads: usize,
}

async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let stored_threads = state.store.thread_count().await.unwrap_or(0);
    Json(StatusResponse {
        name: "inquestd",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        tools: state.tools.infos(),
        backends: state.backends.names().iter().map(|s| s.to_string()).collect(),
        active_sessions: state.admission.session_count().await,
        stored_threads,
    })
}
