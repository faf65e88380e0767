//! The orchestration engine — drives the step loop.
//!
//! One incoming workflow call becomes an internal loop: the caller's own
//! step seeds the run, then the engine executes tool-specific work for each
//! subsequent step with evaluator-generated instructions, until a stop
//! condition fires. Step execution within one run is strictly sequential;
//! each decision depends on all prior steps' consolidated findings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use inquest_config::WorkflowConfig;
use inquest_core::backend::Backend;
use inquest_core::error::Error;
use inquest_core::request::{ExpertAnalysisResult, ResponseStatus, StopReason, WorkflowArgs};
use inquest_core::tool::{StepContext, StepOutput, WorkflowTool};

use crate::evaluator::{StepDecision, StepEvaluator};
use crate::expert::ExpertAnalysisDispatcher;
use crate::run::{BacktrackOutcome, WorkflowRun};

/// The terminal product of one workflow run.
#[derive(Debug)]
pub struct WorkflowOutcome {
    pub run: WorkflowRun,
    pub status: ResponseStatus,
    /// Planned step total: the dynamic limit while continuing, the final
    /// step number once stopped.
    pub total_steps: u32,
    pub expert_analysis: Option<ExpertAnalysisResult>,
    pub notes: Vec<String>,
}

pub struct OrchestrationEngine {
    evaluator: StepEvaluator,
    expert: ExpertAnalysisDispatcher,
    request_deadline: Duration,
}

impl OrchestrationEngine {
    pub fn new(config: &WorkflowConfig, expert: ExpertAnalysisDispatcher) -> Self {
        Self {
            evaluator: StepEvaluator::new(config.max_step_limit),
            expert,
            request_deadline: Duration::from_secs(config.request_deadline_secs),
        }
    }

    /// Run a workflow tool to a terminal state.
    ///
    /// The caller's arguments seed step 1; the engine drives every step
    /// after that. The dynamic step limit always wins over the caller's
    /// hint when smaller — it is the safety bound.
    pub async fn execute(
        &self,
        tool: Arc<dyn WorkflowTool>,
        args: WorkflowArgs,
        backend: Arc<dyn Backend>,
    ) -> Result<WorkflowOutcome, Error> {
        let mut run = WorkflowRun::new(
            tool.name(),
            tool.complexity(),
            args.total_steps_hint,
            args.hypothesis.clone(),
        );
        let deadline = Instant::now() + self.request_deadline;
        let mut pending_backtrack = args.backtrack_from_step;
        let mut notes: Vec<String> = Vec::new();

        // Step 1 is the caller's own step; the engine never re-executes it.
        let seed = StepOutput {
            findings: if args.findings.trim().is_empty() {
                args.step.clone()
            } else {
                args.findings.clone()
            },
            files_checked: args.files_checked.clone(),
            relevant_files: args.relevant_files.clone(),
            confidence: args.confidence,
            hypothesis: args.hypothesis.clone(),
            next_step_required: args.next_step_required,
        };
        run.append_step(seed.clone());
        let mut latest = seed;
        let mut wants_more = latest.next_step_required;

        let reason = loop {
            if let Some(signal) = self.evaluator.off_track_signal(&run) {
                if !notes.contains(&signal) {
                    info!(run_id = %run.run_id, %signal, "Off-track signal");
                    notes.push(signal);
                }
            }

            // The caller's backtrack applies once the run actually contains
            // steps beyond the target.
            let backtrack_now = match pending_backtrack {
                Some(target) if run.has_step(target) && target < run.current_step_number() => {
                    pending_backtrack.take()
                }
                _ => None,
            };

            let decision = self.evaluator.decide(&run, &latest, backtrack_now);
            info!(
                "[AUTO-EXEC] {}: step {}, confidence={}, decision={}",
                run.tool_name,
                run.current_step_number(),
                run.confidence,
                decision_label(&decision)
            );

            let instructions = match decision {
                StepDecision::Stop { reason } => break reason,
                StepDecision::Backtrack { target_step } => {
                    match run.backtrack(target_step) {
                        BacktrackOutcome::Applied { dropped } => {
                            info!(
                                run_id = %run.run_id,
                                target_step,
                                dropped,
                                "Backtracked, discarded steps"
                            );
                        }
                        BacktrackOutcome::UnknownStep => {
                            warn!(run_id = %run.run_id, target_step, "Backtrack target unknown, ignoring");
                        }
                    }
                    format!(
                        "The investigation backtracked to step {target_step}; everything after \
                         it was discarded as a wrong turn. Re-examine the evidence from that \
                         point with a fresh eye."
                    )
                }
                StepDecision::Continue { instructions, .. } => instructions,
            };

            // Execute the next step under what's left of the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(run_id = %run.run_id, "Deadline reached before next step");
                break StopReason::Timeout;
            }

            let ctx = StepContext {
                run_id: run.run_id.clone(),
                tool_name: run.tool_name.clone(),
                step_number: run.current_step_number() + 1,
                instructions,
                consolidated_findings: run.consolidated_findings(),
                hypothesis: run.hypothesis.clone(),
                relevant_files: run.relevant_files(),
            };

            match tokio::time::timeout(remaining, tool.execute_step(&ctx, backend.clone())).await {
                Ok(Ok(output)) => {
                    run.append_step(output.clone());
                    wants_more = output.next_step_required;
                    latest = output;
                }
                Ok(Err(e)) => return Err(Error::Tool(e)),
                Err(_) => {
                    // Abandon the current step; everything appended so far
                    // stays in history.
                    warn!(
                        run_id = %run.run_id,
                        step = ctx.step_number,
                        "Deadline fired mid-step, reporting partial findings"
                    );
                    break StopReason::Timeout;
                }
            }
        };

        if let Some(target) = pending_backtrack {
            warn!(run_id = %run.run_id, target, "Backtrack target never became applicable, ignored");
        }

        let expert_analysis = if self.should_run_expert(reason) {
            Some(self.expert.analyze(&run, tool.expert_system_prompt()).await?)
        } else {
            debug!(run_id = %run.run_id, %reason, "Skipping expert analysis for this stop reason");
            None
        };

        // Budget exhaustion with the tool still asking for steps is a
        // hand-off to the caller for manual continuation.
        let status = match reason {
            StopReason::LimitReached if wants_more => ResponseStatus::Continuing,
            reason => ResponseStatus::Stopped(reason),
        };
        let total_steps = match status {
            ResponseStatus::Continuing => self.evaluator.dynamic_step_limit(&run),
            _ => run.current_step_number(),
        };

        Ok(WorkflowOutcome { run, status, total_steps, expert_analysis, notes })
    }

    /// Expert analysis policy: worth the cost on clean conclusions, skipped
    /// on known-degraded paths (stagnation, budget exhaustion, timeout).
    fn should_run_expert(&self, reason: StopReason) -> bool {
        self.expert.enabled()
            && matches!(reason, StopReason::CallerRequested | StopReason::HypothesisConfirmed)
    }
}

fn decision_label(decision: &StepDecision) -> String {
    match decision {
        StepDecision::Continue { .. } => "continue".into(),
        StepDecision::Stop { reason } => format!("stop({reason})"),
        StepDecision::Backtrack { target_step } => format!("backtrack({target_step})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use inquest_admission::AdmissionController;
    use inquest_config::{AdmissionConfig, ExpertConfig};
    use inquest_core::backend::{BackendRequest, BackendResponse};
    use inquest_core::confidence::Confidence;
    use inquest_core::error::{BackendError, ToolError};
    use inquest_core::tool::ToolComplexity;

    /// A backend that records how often it was called.
    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl CountingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Backend for CountingBackend {
        fn name(&self) -> &str {
            "mock"
        }
        async fn call(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BackendResponse {
                content: "expert verdict".into(),
                model: request.model,
                usage: None,
                truncated: false,
            })
        }
    }

    /// A workflow tool that replays a script of step outputs.
    struct ScriptedTool {
        complexity: ToolComplexity,
        script: Mutex<Vec<StepOutput>>,
        hang_after_script: bool,
    }

    impl ScriptedTool {
        fn new(complexity: ToolComplexity, script: Vec<StepOutput>) -> Arc<Self> {
            Arc::new(Self { complexity, script: Mutex::new(script), hang_after_script: false })
        }

        fn hanging(complexity: ToolComplexity, script: Vec<StepOutput>) -> Arc<Self> {
            Arc::new(Self { complexity, script: Mutex::new(script), hang_after_script: true })
        }
    }

    #[async_trait]
    impl WorkflowTool for ScriptedTool {
        fn name(&self) -> &str {
            "investigate"
        }
        fn description(&self) -> &str {
            "Scripted test workflow"
        }
        fn complexity(&self) -> ToolComplexity {
            self.complexity
        }
        async fn execute_step(
            &self,
            _ctx: &StepContext,
            _backend: Arc<dyn Backend>,
        ) -> Result<StepOutput, ToolError> {
            let next = self.script.lock().unwrap().pop();
            match next {
                Some(output) => Ok(output),
                None if self.hang_after_script => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
                None => Err(ToolError::ExecutionFailed {
                    tool_name: "investigate".into(),
                    reason: "script exhausted".into(),
                }),
            }
        }
    }

    fn step(confidence: Confidence, findings: &str) -> StepOutput {
        StepOutput {
            findings: findings.into(),
            files_checked: vec![],
            relevant_files: vec![],
            confidence,
            hypothesis: None,
            next_step_required: true,
        }
    }

    fn script(steps: Vec<StepOutput>) -> Vec<StepOutput> {
        // Scripts replay via pop(), so store in reverse.
        steps.into_iter().rev().collect()
    }

    fn engine(deadline_secs: u64, expert_backend: Arc<CountingBackend>) -> OrchestrationEngine {
        let admission_config = AdmissionConfig {
            global_capacity: 8,
            backend_capacity: 4,
            session_capacity: 2,
            wait_timeout_secs: 1,
            health_interval_secs: 60,
        };
        let mut backends = HashMap::new();
        backends.insert("mock".to_string(), 4u32);
        let admission = Arc::new(AdmissionController::new(&admission_config, backends));

        let expert = ExpertAnalysisDispatcher::new(
            ExpertConfig {
                enabled: true,
                use_messages_form: true,
                timeout_secs: 10,
                backend: "mock".into(),
                model: "mock-large".into(),
            },
            expert_backend,
            admission,
        );

        OrchestrationEngine::new(
            &WorkflowConfig { request_deadline_secs: deadline_secs, max_step_limit: 24 },
            expert,
        )
    }

    fn args(step_text: &str) -> WorkflowArgs {
        WorkflowArgs {
            step: step_text.into(),
            findings: String::new(),
            total_steps_hint: None,
            files_checked: vec![],
            relevant_files: vec![],
            confidence: Confidence::Exploring,
            hypothesis: None,
            next_step_required: true,
            backtrack_from_step: None,
            continuation_id: None,
        }
    }

    #[tokio::test]
    async fn spec_scenario_stagnation_at_step_three() {
        // total_steps_hint=3, simple complexity (dynamic limit 8),
        // confidence exploring, low, low → stopped_stagnation_detected at
        // step 3, all findings retained, no expert analysis.
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend.clone());
        let tool = ScriptedTool::new(
            ToolComplexity::Simple,
            script(vec![
                step(Confidence::Low, "checked the scheduler, nothing"),
                step(Confidence::Low, "checked the allocator, nothing"),
            ]),
        );

        let mut request = args("crash on startup");
        request.total_steps_hint = Some(3);

        let outcome = engine.execute(tool, request, CountingBackend::new()).await.unwrap();

        assert_eq!(
            outcome.status,
            ResponseStatus::Stopped(StopReason::StagnationDetected)
        );
        assert_eq!(outcome.status.as_wire(), "stopped_stagnation_detected");
        assert_eq!(outcome.run.current_step_number(), 3);
        assert_eq!(outcome.total_steps, 3);

        let findings = outcome.run.consolidated_findings();
        assert!(findings.contains("crash on startup"));
        assert!(findings.contains("scheduler"));
        assert!(findings.contains("allocator"));

        assert!(outcome.expert_analysis.is_none());
        assert_eq!(expert_backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn caller_requested_stop_runs_expert_analysis() {
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend.clone());
        let tool = ScriptedTool::new(ToolComplexity::Medium, vec![]);

        let mut request = args("summarize what we know");
        request.findings = "root cause identified in the retry loop".into();
        request.confidence = Confidence::AlmostCertain;
        request.next_step_required = false;

        let outcome = engine.execute(tool, request, CountingBackend::new()).await.unwrap();

        assert_eq!(outcome.status, ResponseStatus::Stopped(StopReason::CallerRequested));
        assert_eq!(outcome.run.current_step_number(), 1);
        let expert = outcome.expert_analysis.expect("expert analysis expected");
        assert_eq!(expert.content, "expert verdict");
        assert_eq!(expert_backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hypothesis_confirmed_stops_and_runs_expert() {
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend.clone());

        let mut confirming = step(
            Confidence::High,
            "confirmed the permit leak happens during cancellation of the acquire path",
        );
        confirming.hypothesis = Some("permit leak during cancellation".into());
        let tool = ScriptedTool::new(ToolComplexity::Complex, script(vec![confirming]));

        let mut request = args("why do permits run out");
        request.hypothesis = Some("permit leak during cancellation".into());

        let outcome = engine.execute(tool, request, CountingBackend::new()).await.unwrap();

        assert_eq!(
            outcome.status,
            ResponseStatus::Stopped(StopReason::HypothesisConfirmed)
        );
        assert!(outcome.expert_analysis.is_some());
        assert_eq!(expert_backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn limit_reached_hands_off_as_continuing() {
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend.clone());

        // Alternate confidence levels so stagnation never fires; the tool
        // always wants more steps.
        let mut outputs = Vec::new();
        for i in 0..12 {
            let confidence = if i % 2 == 0 { Confidence::High } else { Confidence::VeryHigh };
            outputs.push(step(confidence, &format!("detail {i}")));
        }
        let tool = ScriptedTool::new(ToolComplexity::Simple, script(outputs));

        let outcome = engine
            .execute(tool, args("broad sweep"), CountingBackend::new())
            .await
            .unwrap();

        // Simple base limit is 8; the run stops there and hands off.
        assert_eq!(outcome.status, ResponseStatus::Continuing);
        assert_eq!(outcome.run.current_step_number(), 8);
        assert_eq!(outcome.total_steps, 8);
        // Degraded-path policy: no expert analysis on budget exhaustion
        assert!(outcome.expert_analysis.is_none());
    }

    #[tokio::test]
    async fn never_loops_past_the_dynamic_limit() {
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend);

        let mut outputs = Vec::new();
        for i in 0..50 {
            let confidence = if i % 2 == 0 { Confidence::High } else { Confidence::VeryHigh };
            outputs.push(step(confidence, &format!("detail {i}")));
        }
        let tool = ScriptedTool::new(ToolComplexity::Complex, script(outputs));

        let outcome = engine
            .execute(tool, args("endless"), CountingBackend::new())
            .await
            .unwrap();

        assert!(outcome.run.current_step_number() <= 16 + 4);
    }

    #[tokio::test]
    async fn deadline_mid_step_reports_timeout_with_partial_findings() {
        let expert_backend = CountingBackend::new();
        let engine = engine(1, expert_backend.clone());
        let tool = ScriptedTool::hanging(
            ToolComplexity::Medium,
            script(vec![step(Confidence::Low, "one real step")]),
        );

        let outcome = engine
            .execute(tool, args("slow investigation"), CountingBackend::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ResponseStatus::Stopped(StopReason::Timeout));
        // Caller seed + one scripted step survive
        assert_eq!(outcome.run.current_step_number(), 2);
        assert!(outcome.run.consolidated_findings().contains("one real step"));
        assert!(outcome.expert_analysis.is_none());
    }

    #[tokio::test]
    async fn caller_backtrack_discards_wrong_turn() {
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend);

        let mut closing = step(Confidence::High, "took the right branch this time");
        closing.next_step_required = false;
        let tool = ScriptedTool::new(
            ToolComplexity::Complex,
            script(vec![
                step(Confidence::Low, "promising lead"),
                step(Confidence::Medium, "wrong turn into the parser"),
                closing,
            ]),
        );

        let mut request = args("find the regression");
        request.backtrack_from_step = Some(2);

        let outcome = engine.execute(tool, request, CountingBackend::new()).await.unwrap();

        let findings = outcome.run.consolidated_findings();
        assert!(!findings.contains("wrong turn into the parser"));
        assert!(findings.contains("promising lead"));
        assert!(findings.contains("right branch"));
        assert_eq!(outcome.status, ResponseStatus::Stopped(StopReason::CallerRequested));
    }

    #[tokio::test]
    async fn unknown_backtrack_target_is_ignored() {
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend);

        let mut closing = step(Confidence::Medium, "done looking");
        closing.next_step_required = false;
        let tool = ScriptedTool::new(ToolComplexity::Medium, script(vec![closing]));

        let mut request = args("quick check");
        request.backtrack_from_step = Some(40);

        let outcome = engine.execute(tool, request, CountingBackend::new()).await.unwrap();
        assert_eq!(outcome.status, ResponseStatus::Stopped(StopReason::CallerRequested));
        assert_eq!(outcome.run.current_step_number(), 2);
    }

    #[tokio::test]
    async fn off_track_signal_is_surfaced_as_note() {
        let expert_backend = CountingBackend::new();
        let engine = engine(30, expert_backend);

        let mut scattered = step(Confidence::Low, "looked everywhere");
        scattered.files_checked = (0..8).map(|i| format!("src/f{i}.rs")).collect();
        scattered.relevant_files = vec!["src/f0.rs".into()];
        let mut closing = step(Confidence::Medium, "wrapping up");
        closing.next_step_required = false;
        let tool = ScriptedTool::new(ToolComplexity::Medium, script(vec![scattered, closing]));

        let outcome = engine
            .execute(tool, args("wide net"), CountingBackend::new())
            .await
            .unwrap();

        assert!(
            outcome.notes.iter().any(|n| n.contains("off-track")),
            "expected off-track note, got: {:?}",
            outcome.notes
        );
    }
}
