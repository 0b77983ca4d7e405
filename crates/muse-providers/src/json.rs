//! Best-effort JSON extraction from model text.

use tracing::trace;

/// Parse a JSON object out of free-form model output.
///
/// Strips a surrounding Markdown code fence, then parses the span from the
/// first `{` to the last `}`. Anything that does not decode returns `fallback`.
pub fn parse_json_lenient(text: &str, fallback: serde_json::Value) -> serde_json::Value {
    let cleaned = strip_code_fence(text.trim());

    let span = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => {
            trace!("No JSON object found in model output");
            return fallback;
        }
    };

    match serde_json::from_str::<serde_json::Value>(span) {
        Ok(value) => value,
        Err(e) => {
            trace!(%e, "Model output is not valid JSON, using fallback");
            fallback
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
