//! Deterministic request fingerprints.
//!
//! Two requests coalesce when their fingerprints match, so normalization
//! must be deterministic: object keys are sorted, strings are trimmed, and
//! caller-identity fields that don't change the work are excluded.

use sha2::{Digest, Sha256};

/// Argument keys that never affect what work is executed.
const VOLATILE_KEYS: &[&str] = &["request_id", "continuation_id", "total_steps_hint"];

/// A normalized key over tool name + arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a tool call.
    pub fn compute(tool: &str, arguments: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tool.trim().as_bytes());
        hasher.update([0u8]);
        hasher.update(canonicalize_object(arguments).as_bytes());
        let digest = hasher.finalize();
        Fingerprint(format!("{tool}:{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render an object as a canonical string: keys sorted, volatile keys
/// dropped, nested values normalized recursively.
fn canonicalize_object(map: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut keys: Vec<&String> = map
        .keys()
        .filter(|k| !VOLATILE_KEYS.contains(&k.as_str()))
        .collect();
    keys.sort();

    let parts: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{}={}", k, canonicalize_value(&map[k])))
        .collect();
    format!("{{{}}}", parts.join(","))
}

fn canonicalize_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("\"{}\"", s.trim()),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize_value).collect();
            format!("[{}]", parts.join(","))
        }
        serde_json::Value::Object(map) => canonicalize_object(map),
        other => other.to_string(),
    }
}
