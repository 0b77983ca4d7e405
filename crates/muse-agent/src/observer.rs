//! Observation hooks fired around tool dispatch.
//!
//! Observers are synchronous and see the call after the fact; they cannot
//! change what the executor does next.

use serde_json::Value;
use tracing::info;

use muse_tools::ToolOutcome;

pub trait ToolObserver: Send + Sync {
    fn on_tool_call(&self, _tool: &str, _params: &Value) {}

    fn on_tool_result(&self, _tool: &str, _outcome: &ToolOutcome) {}
}

/// Logs every dispatch through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

/// Truncate at a char boundary for log output.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

impl ToolObserver for LoggingObserver {
    fn on_tool_call(&self, tool: &str, params: &Value) {
        info!(tool, params = %preview(&params.to_string(), 100), "Tool call");
    }

    fn on_tool_result(&self, tool: &str, outcome: &ToolOutcome) {
        info!(tool, success = outcome.is_success(), "Tool result");
    }
}
