//! Step evaluation — pure decision logic.
//!
//! Given accumulated run state and the latest step, decide whether to
//! continue, stop, or backtrack. No side effects; the engine owns all I/O.

use tracing::warn;

use inquest_core::confidence::Confidence;
use inquest_core::request::StopReason;
use inquest_core::tool::StepOutput;

use crate::run::WorkflowRun;

/// Shared-keyword ratio above which a non-empty hypothesis counts as
/// validated by the findings. A heuristic, tunable — the tests pin behavior
/// at the boundary, not this exact value.
pub const HYPOTHESIS_OVERLAP_THRESHOLD: f32 = 0.6;

/// Consecutive same-confidence steps that trip the stagnation breaker.
const STAGNATION_WINDOW: usize = 3;

/// Floor below which no hint can drag the dynamic limit.
const MIN_STEP_LIMIT: u32 = 2;

/// Extra steps a low hint is always granted; investigations routinely
/// overrun the caller's estimate.
const HINT_GRACE_STEPS: u32 = 5;

/// Files-per-extra-step when sizing the budget to the analysis surface.
const FILES_PER_BONUS_STEP: usize = 5;
const MAX_FILE_BONUS: u32 = 4;

/// The evaluator's verdict for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    /// Keep going; `instructions` seed the next step.
    Continue {
        steps_remaining: u32,
        instructions: String,
    },
    /// Terminal for this run.
    Stop { reason: StopReason },
    /// Truncate history to `target_step` and resume from there.
    Backtrack { target_step: u32 },
}

/// Pure decision logic over run state.
pub struct StepEvaluator {
    /// Hard ceiling from configuration; wins over every other input.
    max_step_limit: u32,
}

impl StepEvaluator {
    pub fn new(max_step_limit: u32) -> Self {
        Self { max_step_limit }
    }

    /// The step budget for this run.
    ///
    /// Computed from the tool's declared complexity class, the caller's
    /// hint, and the number of files under analysis. More files or higher
    /// complexity raise the ceiling (bounded); a low hint lowers it, but
    /// never below the hint plus a grace allowance.
    pub fn dynamic_step_limit(&self, run: &WorkflowRun) -> u32 {
        let base = run.complexity.base_step_limit();
        let file_bonus =
            ((run.files_checked().len() / FILES_PER_BONUS_STEP) as u32).min(MAX_FILE_BONUS);
        let mut limit = base + file_bonus;

        if let Some(hint) = run.total_steps_hint {
            limit = limit.min(hint.saturating_mul(2).max(hint + HINT_GRACE_STEPS));
        }

        limit.clamp(MIN_STEP_LIMIT, self.max_step_limit)
    }

    /// Decide what happens after the latest step.
    ///
    /// `backtrack_request` is the caller's explicit backtrack target, if
    /// one is pending. Rules apply in priority order.
    pub fn decide(
        &self,
        run: &WorkflowRun,
        latest: &StepOutput,
        backtrack_request: Option<u32>,
    ) -> StepDecision {
        // Explicit caller backtrack wins over everything else.
        if let Some(target) = backtrack_request {
            if run.has_step(target) && target < run.current_step_number() {
                return StepDecision::Backtrack { target_step: target };
            }
            warn!(
                run_id = %run.run_id,
                target,
                steps = run.current_step_number(),
                "Backtrack target not in history, ignoring"
            );
        }

        // 1. Explicit completion.
        if !latest.next_step_required {
            return StepDecision::Stop { reason: StopReason::CallerRequested };
        }

        // 2. Step budget exhausted.
        let limit = self.dynamic_step_limit(run);
        if run.current_step_number() >= limit {
            return StepDecision::Stop { reason: StopReason::LimitReached };
        }

        // 3. Stagnation circuit breaker: repeated low-band confidence is a
        //    hard abort, not a retry.
        if self.is_stagnating(run) {
            return StepDecision::Stop { reason: StopReason::StagnationDetected };
        }

        // 4. Hypothesis validated.
        if let Some(hypothesis) = run.hypothesis.as_deref() {
            if !hypothesis.trim().is_empty()
                && run.confidence.supports_hypothesis()
                && keyword_overlap(&run.consolidated_findings(), hypothesis)
                    > HYPOTHESIS_OVERLAP_THRESHOLD
            {
                return StepDecision::Stop { reason: StopReason::HypothesisConfirmed };
            }
        }

        // 6. Otherwise continue with context-aware guidance.
        let steps_remaining = limit - run.current_step_number();
        StepDecision::Continue {
            steps_remaining,
            instructions: next_step_instructions(run, steps_remaining),
        }
    }

    /// Rule 5: informational only. Surfaced to the caller and telemetry,
    /// never stops the run.
    pub fn off_track_signal(&self, run: &WorkflowRun) -> Option<String> {
        let checked = run.files_checked().len();
        let relevant = run.relevant_files().len();
        if checked > 5 && relevant < 2 {
            Some(format!(
                "Investigation may be off-track: {checked} files checked, only {relevant} marked relevant"
            ))
        } else {
            None
        }
    }

    /// The run is stagnating when the last three steps all sit in the
    /// low-confidence band and the latest step failed to improve on its
    /// predecessor.
    fn is_stagnating(&self, run: &WorkflowRun) -> bool {
        let steps = run.steps();
        if steps.len() < STAGNATION_WINDOW {
            return false;
        }
        let window = &steps[steps.len() - STAGNATION_WINDOW..];
        let all_low_band = window.iter().all(|s| s.confidence.stagnation_eligible());
        let latest_flat =
            window[STAGNATION_WINDOW - 1].confidence <= window[STAGNATION_WINDOW - 2].confidence;
        all_low_band && latest_flat
    }
}

/// Ratio of hypothesis keywords (4+ chars) that appear in the findings.
fn keyword_overlap(findings: &str, hypothesis: &str) -> f32 {
    let keywords: std::collections::HashSet<String> = hypothesis
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .map(|w| w.to_lowercase())
        .collect();

    if keywords.is_empty() {
        return 0.0;
    }

    let findings_words: std::collections::HashSet<String> = findings
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .map(|w| w.to_lowercase())
        .collect();

    let shared = keywords.iter().filter(|k| findings_words.contains(*k)).count();
    shared as f32 / keywords.len() as f32
}

/// Context-aware guidance for the next step, keyed to the confidence band.
fn next_step_instructions(run: &WorkflowRun, steps_remaining: u32) -> String {
    let guidance = match run.confidence {
        Confidence::Exploring => {
            "Explore broadly: map the relevant code paths, identify candidate causes, \
             and note anything surprising before narrowing down."
        }
        Confidence::Low | Confidence::Medium => {
            "Validate the current evidence: trace the suspected path end to end and \
             actively look for observations that contradict it."
        }
        Confidence::High => {
            "Confirm edge cases: check boundary conditions, concurrent access, and \
             error paths that could undermine the current conclusion."
        }
        _ => {
            "Finalize: restate the conclusion, verify every claim against the \
             evidence gathered, and list the concrete follow-up actions."
        }
    };

    let unexamined = run.unexamined_relevant_files();
    let files_note = if unexamined > 0 {
        format!(" {unexamined} relevant file(s) have not been examined yet.")
    } else {
        String::new()
    };

    format!("{guidance} {steps_remaining} step(s) remain in the budget.{files_note}")
}
