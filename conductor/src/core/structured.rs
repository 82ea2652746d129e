//! Extraction of structured payloads from free-form oracle responses.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::ConductorError;

// The closing fence must sit alone on its own line, so backticks inside the
// body (string literals, nested docs) do not end the block early.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+.-]*[ \t]*\r?\n(?:(.*?)\r?\n)?[ \t]*```[ \t]*(?:\r?\n|$)")
        .expect("fence regex is valid")
});

/// Return the body of the first fenced block in `raw`, or `raw` itself
/// (trimmed) when no fence is present. Only one fence is stripped.
pub fn strip_fence(raw: &str) -> &str {
    match FENCE_RE.captures(raw) {
        Some(caps) => caps.get(1).map_or("", |body| body.as_str()),
        None => raw.trim(),
    }
}

/// Parse a YAML (or JSON) payload, tolerating one surrounding fence.
///
/// Failures carry the untouched response so the operator can inspect it.
pub fn parse_structured<T: DeserializeOwned>(
    what: &'static str,
    raw: &str,
) -> Result<T, ConductorError> {
    serde_yaml::from_str(strip_fence(raw)).map_err(|err| ConductorError::PlanParse {
        what,
        message: err.to_string(),
        raw: raw.to_string(),
    })
}

/// Keep only the last `max_lines` lines of `text`.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let mut out = String::new();
    if start > 0 {
        out.push_str(&format!("[... {start} earlier lines omitted]\n"));
    }
    out.push_str(&lines[start..].join("\n"));
    out
}
