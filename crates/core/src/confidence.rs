//! Confidence — the ordered certainty scale that gates workflow runs.
//!
//! Every investigation step reports how certain the run currently is of its
//! conclusion. The orchestration engine compares levels, so ordering matters:
//! `Exploring < Low < Medium < High < VeryHigh < AlmostCertain < Certain`.

use serde::{Deserialize, Serialize};

/// How certain an in-progress investigation is of its conclusion.
///
/// Totally ordered. A run's confidence is monotonically non-decreasing
/// except immediately after a backtrack, which may reset it to the value
/// recorded at the backtrack target step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Still forming a picture of the problem.
    Exploring,
    /// A hunch, little supporting evidence.
    Low,
    /// Some evidence, alternatives not ruled out.
    Medium,
    /// Strong evidence for a specific conclusion.
    High,
    /// Very strong evidence, minor gaps remain.
    VeryHigh,
    /// Effectively conclusive; expert analysis can still add value.
    AlmostCertain,
    /// Conclusive. No further analysis needed.
    Certain,
}

impl Confidence {
    /// Levels in which repeated steps count toward the stagnation
    /// circuit breaker. High-confidence plateaus are convergence, not
    /// stagnation.
    pub fn stagnation_eligible(self) -> bool {
        matches!(self, Confidence::Exploring | Confidence::Low | Confidence::Medium)
    }

    /// Whether this level is high enough to confirm a hypothesis.
    pub fn supports_hypothesis(self) -> bool {
        self >= Confidence::High
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Exploring => "exploring",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::VeryHigh => "very_high",
            Confidence::AlmostCertain => "almost_certain",
            Confidence::Certain => "certain",
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Exploring
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "exploring" => Ok(Confidence::Exploring),
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            "very_high" => Ok(Confidence::VeryHigh),
            "almost_certain" => Ok(Confidence::AlmostCertain),
            "certain" => Ok(Confidence::Certain),
            other => Err(format!("Unknown confidence level: {other}")),
        }
    }
}
