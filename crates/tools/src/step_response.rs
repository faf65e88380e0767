//! Shared step-response parsing for workflow tools.
//!
//! Workflow tools ask the backend to answer each step with a JSON object.
//! Models don't always comply, so parsing is forgiving: a non-JSON reply
//! becomes the step's findings at low confidence instead of an error.

use serde::Deserialize;
use tracing::debug;

use inquest_core::confidence::Confidence;
use inquest_core::tool::StepOutput;

/// The JSON shape workflow tools request from the backend.
#[derive(Debug, Deserialize)]
struct RawStepResponse {
    findings: String,
    #[serde(default)]
    confidence: Option<Confidence>,
    #[serde(default)]
    files_checked: Vec<String>,
    #[serde(default)]
    relevant_files: Vec<String>,
    #[serde(default)]
    hypothesis: Option<String>,
    #[serde(default = "default_true")]
    next_step_required: bool,
}

fn default_true() -> bool {
    true
}

/// The instruction block appended to every step prompt.
pub(crate) const STEP_RESPONSE_FORMAT: &str = "\
Respond with a single JSON object:\n\
{\n\
  \"findings\": \"<what this step established>\",\n\
  \"confidence\": \"exploring|low|medium|high|very_high|almost_certain|certain\",\n\
  \"files_checked\": [\"<path>\", ...],\n\
  \"relevant_files\": [\"<path>\", ...],\n\
  \"hypothesis\": \"<current working hypothesis, or omit>\",\n\
  \"next_step_required\": true|false\n\
}";

/// Parse a backend reply into a step output.
///
/// Accepts the object bare or wrapped in a Markdown code fence. Anything
/// unparseable is treated as plain findings at `low` confidence.
pub(crate) fn parse_step_response(content: &str) -> StepOutput {
    let candidate = strip_code_fence(content);

    match serde_json::from_str::<RawStepResponse>(candidate) {
        Ok(raw) => StepOutput {
            findings: raw.findings,
            files_checked: raw.files_checked,
            relevant_files: raw.relevant_files,
            confidence: raw.confidence.unwrap_or(Confidence::Low),
            hypothesis: raw.hypothesis.filter(|h| !h.trim().is_empty()),
            next_step_required: raw.next_step_required,
        },
        Err(e) => {
            debug!(error = %e, "Step response was not structured JSON, using raw text");
            StepOutput {
                findings: content.trim().to_string(),
                files_checked: vec![],
                relevant_files: vec![],
                confidence: Confidence::Low,
                hypothesis: None,
                next_step_required: true,
            }
        }
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_object() {
        let output = parse_step_response(
            r#"{
                "findings": "the cache is never invalidated",
                "confidence": "high",
                "files_checked": ["src/cache.rs"],
                "relevant_files": ["src/cache.rs"],
                "hypothesis": "stale cache entries",
                "next_step_required": false
            }"#,
        );
        assert_eq!(output.findings, "the cache is never invalidated");
        assert_eq!(output.confidence, Confidence::High);
        assert_eq!(output.files_checked, vec!["src/cache.rs"]);
        assert_eq!(output.hypothesis.as_deref(), Some("stale cache entries"));
        assert!(!output.next_step_required);
    }

    #[test]
    fn parses_fenced_object() {
        let output = parse_step_response(
            "```json\n{\"findings\": \"fenced\", \"confidence\": \"medium\"}\n```",
        );
        assert_eq!(output.findings, "fenced");
        assert_eq!(output.confidence, Confidence::Medium);
        assert!(output.next_step_required);
    }

    #[test]
    fn plain_text_becomes_low_confidence_findings() {
        let output = parse_step_response("I looked around and found nothing conclusive.");
        assert_eq!(output.findings, "I looked around and found nothing conclusive.");
        assert_eq!(output.confidence, Confidence::Low);
        assert!(output.next_step_required);
        assert!(output.files_checked.is_empty());
    }

    #[test]
    fn missing_confidence_defaults_low() {
        let output = parse_step_response(r#"{"findings": "partial object"}"#);
        assert_eq!(output.confidence, Confidence::Low);
    }

    #[test]
    fn blank_hypothesis_is_dropped() {
        let output =
            parse_step_response(r#"{"findings": "x", "confidence": "low", "hypothesis": "  "}"#);
        assert!(output.hypothesis.is_none());
    }
}
