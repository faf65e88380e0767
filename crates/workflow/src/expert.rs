//! Expert analysis dispatch — the final, heavier backend call.
//!
//! Builds either a structured message sequence or a single formatted
//! prompt (config flag, evaluated once per call), probes the backend for
//! deferred capability, and falls back to the synchronous path without
//! surfacing the fallback beyond a debug log. The whole call sits under a
//! hard deadline; expiry is reported as a timeout distinct from a backend
//! error and is never retried here — retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use inquest_admission::AdmissionController;
use inquest_config::ExpertConfig;
use inquest_core::backend::{Backend, BackendRequest, BackendResponse, CallInput};
use inquest_core::error::{Error, WorkflowError};
use inquest_core::message::Message;
use inquest_core::request::ExpertAnalysisResult;

use crate::run::WorkflowRun;

pub struct ExpertAnalysisDispatcher {
    config: ExpertConfig,
    backend: Arc<dyn Backend>,
    admission: Arc<AdmissionController>,
}

impl ExpertAnalysisDispatcher {
    pub fn new(
        config: ExpertConfig,
        backend: Arc<dyn Backend>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        Self { config, backend, admission }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Run expert analysis over a concluded run.
    ///
    /// Goes through the same admission path as any other backend access:
    /// a backend permit is held for the duration of the call and released
    /// on every exit, including timeout.
    pub async fn analyze(
        &self,
        run: &WorkflowRun,
        system_prompt: String,
    ) -> Result<ExpertAnalysisResult, Error> {
        let _lease = self.admission.acquire_backend(&self.config.backend).await?;

        let request = BackendRequest {
            model: self.config.model.clone(),
            input: self.build_input(run, system_prompt),
            temperature: 0.2,
            max_tokens: None,
        };

        info!(
            run_id = %run.run_id,
            backend = %self.config.backend,
            model = %self.config.model,
            "Dispatching expert analysis"
        );

        let deadline = Duration::from_secs(self.config.timeout_secs);
        let response = tokio::time::timeout(deadline, self.call_with_fallback(request))
            .await
            .map_err(|_| {
                WorkflowError::ExpertTimeout { timeout_secs: self.config.timeout_secs }
            })??;

        Ok(ExpertAnalysisResult {
            content: response.content,
            model: response.model,
            usage: response.usage,
            truncated: response.truncated,
        })
    }

    /// Capability-probed two-branch call.
    ///
    /// The probe decides the branch; a deferred attempt that then fails
    /// with a backend error is recovered locally by the sync path. A sync
    /// failure propagates.
    async fn call_with_fallback(
        &self,
        request: BackendRequest,
    ) -> Result<BackendResponse, Error> {
        if self.backend.capabilities().deferred {
            match self.backend.call_deferred(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(
                        backend = %self.backend.name(),
                        error = %e,
                        "Deferred expert call failed, falling back to sync"
                    );
                }
            }
        } else {
            debug!(
                backend = %self.backend.name(),
                "Backend lacks deferred capability, using sync path"
            );
        }

        Ok(self.backend.call(request).await?)
    }

    /// Message-array or single-prompt form, per the config flag.
    fn build_input(&self, run: &WorkflowRun, system_prompt: String) -> CallInput {
        let findings = run.consolidated_findings();
        let hypothesis = run
            .hypothesis
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .map(|h| format!("\n\nWorking hypothesis: {h}"))
            .unwrap_or_default();

        if self.config.use_messages_form {
            CallInput::Messages {
                messages: vec![
                    Message::system(system_prompt),
                    Message::user(format!(
                        "Investigation findings after {} step(s):\n\n{findings}{hypothesis}",
                        run.current_step_number()
                    )),
                ],
            }
        } else {
            CallInput::Prompt {
                prompt: format!(
                    "{system_prompt}\n\nInvestigation findings after {} step(s):\n\n\
                     {findings}{hypothesis}",
                    run.current_step_number()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use inquest_config::AdmissionConfig;
    use inquest_core::backend::BackendCapabilities;
    use inquest_core::confidence::Confidence;
    use inquest_core::error::BackendError;
    use inquest_core::tool::{StepOutput, ToolComplexity};

    /// Which paths a mock backend was called through.
    #[derive(Default)]
    struct CallLog {
        sync_calls: AtomicUsize,
        deferred_calls: AtomicUsize,
        last_input: Mutex<Option<CallInput>>,
    }

    struct MockBackend {
        deferred: bool,
        deferred_fails: bool,
        hang: bool,
        log: Arc<CallLog>,
    }

    impl MockBackend {
        fn sync_only(log: Arc<CallLog>) -> Self {
            Self { deferred: false, deferred_fails: false, hang: false, log }
        }

        fn deferred_ok(log: Arc<CallLog>) -> Self {
            Self { deferred: true, deferred_fails: false, hang: false, log }
        }

        fn deferred_broken(log: Arc<CallLog>) -> Self {
            Self { deferred: true, deferred_fails: true, hang: false, log }
        }

        fn hanging(log: Arc<CallLog>) -> Self {
            Self { deferred: false, deferred_fails: false, hang: true, log }
        }

        fn respond(&self, request: &BackendRequest) -> BackendResponse {
            *self.log.last_input.lock().unwrap() = Some(request.input.clone());
            BackendResponse {
                content: "expert verdict".into(),
                model: request.model.clone(),
                usage: None,
                truncated: false,
            }
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities { deferred: self.deferred }
        }

        async fn call(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
            self.log.sync_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(self.respond(&request))
        }

        async fn call_deferred(
            &self,
            request: BackendRequest,
        ) -> Result<BackendResponse, BackendError> {
            self.log.deferred_calls.fetch_add(1, Ordering::SeqCst);
            if self.deferred_fails {
                return Err(BackendError::ApiError {
                    status_code: 500,
                    message: "deferred job queue unavailable".into(),
                });
            }
            Ok(self.respond(&request))
        }
    }

    fn admission() -> Arc<AdmissionController> {
        let config = AdmissionConfig {
            global_capacity: 4,
            backend_capacity: 2,
            session_capacity: 1,
            wait_timeout_secs: 1,
            health_interval_secs: 60,
        };
        let mut backends = HashMap::new();
        backends.insert("mock".to_string(), 2u32);
        Arc::new(AdmissionController::new(&config, backends))
    }

    fn expert_config(timeout_secs: u64, use_messages_form: bool) -> ExpertConfig {
        ExpertConfig {
            enabled: true,
            use_messages_form,
            timeout_secs,
            backend: "mock".into(),
            model: "mock-large".into(),
        }
    }

    fn concluded_run() -> WorkflowRun {
        let mut run = WorkflowRun::new("investigate", ToolComplexity::Complex, None, None);
        run.append_step(StepOutput {
            findings: "the pool leaks permits under cancellation".into(),
            files_checked: vec!["src/pool.rs".into()],
            relevant_files: vec!["src/pool.rs".into()],
            confidence: Confidence::High,
            hypothesis: Some("permit leak".into()),
            next_step_required: false,
        });
        run
    }

    fn dispatcher(backend: MockBackend, config: ExpertConfig) -> ExpertAnalysisDispatcher {
        ExpertAnalysisDispatcher::new(config, Arc::new(backend), admission())
    }

    #[tokio::test]
    async fn sync_only_backend_uses_sync_path() {
        let log = Arc::new(CallLog::default());
        let dispatcher =
            dispatcher(MockBackend::sync_only(log.clone()), expert_config(10, true));

        let result = dispatcher.analyze(&concluded_run(), "be thorough".into()).await.unwrap();
        assert_eq!(result.content, "expert verdict");
        assert_eq!(result.model, "mock-large");
        assert_eq!(log.sync_calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.deferred_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deferred_capable_backend_uses_deferred_path() {
        let log = Arc::new(CallLog::default());
        let dispatcher =
            dispatcher(MockBackend::deferred_ok(log.clone()), expert_config(10, true));

        dispatcher.analyze(&concluded_run(), "sys".into()).await.unwrap();
        assert_eq!(log.deferred_calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deferred_failure_falls_back_to_sync_with_identical_shape() {
        let log = Arc::new(CallLog::default());
        let broken =
            dispatcher(MockBackend::deferred_broken(log.clone()), expert_config(10, true));

        let fallback = broken.analyze(&concluded_run(), "sys".into()).await.unwrap();
        assert_eq!(log.deferred_calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.sync_calls.load(Ordering::SeqCst), 1);

        // The fallback result is shaped exactly like a sync-only result
        let sync_log = Arc::new(CallLog::default());
        let sync_only = dispatcher(MockBackend::sync_only(sync_log), expert_config(10, true));
        let direct = sync_only.analyze(&concluded_run(), "sys".into()).await.unwrap();

        assert_eq!(
            serde_json::to_value(&fallback).unwrap(),
            serde_json::to_value(&direct).unwrap()
        );
    }

    #[tokio::test]
    async fn hard_deadline_yields_timeout_not_backend_error() {
        let log = Arc::new(CallLog::default());
        let dispatcher = dispatcher(MockBackend::hanging(log), expert_config(1, true));

        // Use a sub-second deadline via the config's seconds granularity:
        // 1s deadline against an endless call.
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.analyze(&concluded_run(), "sys".into()),
        )
        .await
        .expect("dispatcher must give up on its own")
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Workflow(WorkflowError::ExpertTimeout { timeout_secs: 1 })
        ));
    }

    #[tokio::test]
    async fn timeout_releases_backend_permit() {
        let log = Arc::new(CallLog::default());
        let admission = admission();
        let dispatcher = ExpertAnalysisDispatcher::new(
            expert_config(1, true),
            Arc::new(MockBackend::hanging(log)),
            admission.clone(),
        );

        let _ = dispatcher.analyze(&concluded_run(), "sys".into()).await;

        let pool = &admission.backends()["mock"];
        assert_eq!(pool.current(), pool.expected(), "permit must be released after timeout");
    }

    #[tokio::test]
    async fn messages_form_carries_system_and_findings() {
        let log = Arc::new(CallLog::default());
        let dispatcher =
            dispatcher(MockBackend::sync_only(log.clone()), expert_config(10, true));

        dispatcher.analyze(&concluded_run(), "analysis rules".into()).await.unwrap();

        match log.last_input.lock().unwrap().as_ref().unwrap() {
            CallInput::Messages { messages } => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[0].content, "analysis rules");
                assert!(messages[1].content.contains("pool leaks permits"));
                assert!(messages[1].content.contains("Working hypothesis: permit leak"));
            }
            other => panic!("Expected messages form, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn prompt_form_is_a_single_formatted_prompt() {
        let log = Arc::new(CallLog::default());
        let dispatcher =
            dispatcher(MockBackend::sync_only(log.clone()), expert_config(10, false));

        dispatcher.analyze(&concluded_run(), "analysis rules".into()).await.unwrap();

        match log.last_input.lock().unwrap().as_ref().unwrap() {
            CallInput::Prompt { prompt } => {
                assert!(prompt.starts_with("analysis rules"));
                assert!(prompt.contains("pool leaks permits"));
            }
            other => panic!("Expected prompt form, got: {other:?}"),
        }
    }
}
