//! Workflow run state.
//!
//! A `WorkflowRun` is owned by exactly one engine task for its lifetime.
//! Steps are append-only; the single exception is a backtrack, which
//! truncates history and recomputes everything derived from it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use inquest_core::confidence::Confidence;
use inquest_core::tool::{StepOutput, ToolComplexity};

/// One completed investigation step. Never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based step number.
    pub step_number: u32,

    /// What this step found.
    pub findings: String,

    /// Files examined during this step.
    pub files_checked: Vec<String>,

    /// Files confirmed relevant during this step.
    pub relevant_files: Vec<String>,

    /// Confidence reported by this step.
    pub confidence: Confidence,

    /// Hypothesis as of this step.
    pub hypothesis: Option<String>,
}

/// What applying a backtrack request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacktrackOutcome {
    /// History truncated; this many steps were discarded.
    Applied { dropped: u32 },
    /// The target step is not in history. No-op.
    UnknownStep,
}

/// The state of one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub run_id: String,
    pub tool_name: String,
    pub complexity: ToolComplexity,
    steps: Vec<Step>,
    pub total_steps_hint: Option<u32>,
    /// Run-level confidence: monotonically non-decreasing across appends,
    /// reset only by a backtrack.
    pub confidence: Confidence,
    pub hypothesis: Option<String>,
}

impl WorkflowRun {
    pub fn new(
        tool_name: impl Into<String>,
        complexity: ToolComplexity,
        total_steps_hint: Option<u32>,
        initial_hypothesis: Option<String>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            complexity,
            steps: Vec::new(),
            total_steps_hint,
            confidence: Confidence::Exploring,
            hypothesis: initial_hypothesis,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The number of the most recent step (0 before the first append).
    pub fn current_step_number(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn has_step(&self, step_number: u32) -> bool {
        step_number >= 1 && step_number <= self.current_step_number()
    }

    /// Append the outcome of one step.
    ///
    /// Run-level confidence only moves up here; a step reporting lower
    /// confidence than the run already reached records its own value but
    /// does not drag the run back down.
    pub fn append_step(&mut self, output: StepOutput) -> &Step {
        let step = Step {
            step_number: self.current_step_number() + 1,
            findings: output.findings,
            files_checked: output.files_checked,
            relevant_files: output.relevant_files,
            confidence: output.confidence,
            hypothesis: output.hypothesis.clone(),
        };

        self.confidence = self.confidence.max(output.confidence);
        if output.hypothesis.is_some() {
            self.hypothesis = output.hypothesis;
        }

        self.steps.push(step);
        self.steps.last().expect("just pushed")
    }

    /// Truncate history to `target_step` (inclusive) and recompute
    /// everything derived from it. Confidence resets to the value recorded
    /// at the target step.
    pub fn backtrack(&mut self, target_step: u32) -> BacktrackOutcome {
        if !self.has_step(target_step) {
            return BacktrackOutcome::UnknownStep;
        }

        let dropped = self.current_step_number() - target_step;
        self.steps.truncate(target_step as usize);

        let target = self.steps.last().expect("target step retained");
        self.confidence = target.confidence;
        self.hypothesis = target.hypothesis.clone();

        BacktrackOutcome::Applied { dropped }
    }

    /// All retained findings, consolidated oldest-first. Contains nothing
    /// from backtracked-away steps.
    pub fn consolidated_findings(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("=== Step {} (confidence: {}) ===\n{}", s.step_number, s.confidence, s.findings))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Distinct files examined across retained steps.
    pub fn files_checked(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut files = Vec::new();
        for step in &self.steps {
            for file in &step.files_checked {
                if seen.insert(file.clone()) {
                    files.push(file.clone());
                }
            }
        }
        files
    }

    /// Distinct files confirmed relevant across retained steps.
    pub fn relevant_files(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut files = Vec::new();
        for step in &self.steps {
            for file in &step.relevant_files {
                if seen.insert(file.clone()) {
                    files.push(file.clone());
                }
            }
        }
        files
    }

    /// Relevant files no retained step has examined yet.
    pub fn unexamined_relevant_files(&self) -> usize {
        let checked: std::collections::HashSet<&String> =
            self.steps.iter().flat_map(|s| s.files_checked.iter()).collect();
        self.relevant_files()
            .iter()
            .filter(|f| !checked.contains(f))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(confidence: Confidence, findings: &str) -> StepOutput {
        StepOutput {
            findings: findings.into(),
            files_checked: vec![],
            relevant_files: vec![],
            confidence,
            hypothesis: None,
            next_step_required: true,
        }
    }

    fn run() -> WorkflowRun {
        WorkflowRun::new("investigate", ToolComplexity::Complex, None, None)
    }

    #[test]
    fn steps_number_sequentially() {
        let mut run = run();
        run.append_step(output(Confidence::Exploring, "a"));
        run.append_step(output(Confidence::Low, "b"));
        assert_eq!(run.current_step_number(), 2);
        assert_eq!(run.steps()[1].step_number, 2);
    }

    #[test]
    fn run_confidence_is_monotonic() {
        let mut run = run();
        run.append_step(output(Confidence::Medium, "a"));
        assert_eq!(run.confidence, Confidence::Medium);

        // A step reporting lower confidence doesn't drag the run down
        run.append_step(output(Confidence::Low, "b"));
        assert_eq!(run.confidence, Confidence::Medium);
        assert_eq!(run.steps()[1].confidence, Confidence::Low);

        run.append_step(output(Confidence::High, "c"));
        assert_eq!(run.confidence, Confidence::High);
    }

    #[test]
    fn backtrack_truncates_and_resets_confidence() {
        let mut run = run();
        run.append_step(output(Confidence::Low, "first clue"));
        run.append_step(output(Confidence::Medium, "wrong turn"));
        run.append_step(output(Confidence::High, "dead end"));

        let outcome = run.backtrack(1);
        assert_eq!(outcome, BacktrackOutcome::Applied { dropped: 2 });
        assert_eq!(run.current_step_number(), 1);
        assert_eq!(run.confidence, Confidence::Low);

        let findings = run.consolidated_findings();
        assert!(findings.contains("first clue"));
        assert!(!findings.contains("wrong turn"));
        assert!(!findings.contains("dead end"));
    }

    #[test]
    fn backtrack_to_unknown_step_is_noop() {
        let mut run = run();
        run.append_step(output(Confidence::Low, "a"));

        assert_eq!(run.backtrack(5), BacktrackOutcome::UnknownStep);
        assert_eq!(run.backtrack(0), BacktrackOutcome::UnknownStep);
        assert_eq!(run.current_step_number(), 1);
    }

    #[test]
    fn backtrack_restores_hypothesis() {
        let mut run = run();
        let mut first = output(Confidence::Low, "a");
        first.hypothesis = Some("race condition in the pool".into());
        run.append_step(first);

        let mut second = output(Confidence::Medium, "b");
        second.hypothesis = Some("config typo".into());
        run.append_step(second);
        assert_eq!(run.hypothesis.as_deref(), Some("config typo"));

        run.backtrack(1);
        assert_eq!(run.hypothesis.as_deref(), Some("race condition in the pool"));
    }

    #[test]
    fn file_lists_deduplicate_across_steps() {
        let mut run = run();
        let mut a = output(Confidence::Low, "a");
        a.files_checked = vec!["src/main.rs".into(), "src/lib.rs".into()];
        a.relevant_files = vec!["src/lib.rs".into()];
        run.append_step(a);

        let mut b = output(Confidence::Medium, "b");
        b.files_checked = vec!["src/lib.rs".into(), "src/pool.rs".into()];
        b.relevant_files = vec!["src/lib.rs".into(), "src/pool.rs".into()];
        run.append_step(b);

        assert_eq!(run.files_checked().len(), 3);
        assert_eq!(run.relevant_files().len(), 2);
        assert_eq!(run.unexamined_relevant_files(), 0);
    }

    #[test]
    fn consolidated_findings_keeps_order() {
        let mut run = run();
        run.append_step(output(Confidence::Low, "earlier"));
        run.append_step(output(Confidence::Medium, "later"));

        let findings = run.consolidated_findings();
        let earlier = findings.find("earlier").unwrap();
        let later = findings.find("later").unwrap();
        assert!(earlier < later);
    }
}
