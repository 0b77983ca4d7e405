//! Agent execution engine.
//!
//! The executor turns one user turn into a bounded sequence of model
//! decisions and tool invocations. A decision is either a final answer or a
//! tool call; successful tool calls end the run unless a workflow rule asks
//! for another step. The streaming variant runs the same loop and reports
//! each transition as a [`StreamEvent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use muse_providers::ProviderError;
use muse_tools::ToolOutcome;

pub mod decision;
pub mod events;
pub mod executor;
pub mod narrator;
pub mod observer;
pub mod prompt;
pub mod router;
pub mod telemetry;
pub mod workflow;

pub use decision::ModelDecision;
pub use events::{EventSink, StreamEvent};
pub use executor::AgentExecutor;
pub use narrator::CognitiveStep;
pub use observer::{LoggingObserver, ToolObserver};
pub use router::{IntentRouter, RouterDecision};
pub use telemetry::Telemetry;
pub use workflow::Workflow;

/// Message of the bounded failure returned for an unusable decision.
pub const INVALID_RESPONSE: &str = "Agent returned invalid response";

/// Message of the bounded failure returned when the budget runs out.
pub const MAX_ITERATIONS_REACHED: &str = "Max iterations reached";

/// Errors that escape a run. Everything else is a [`RunResult`] value.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Which terminal branch produced a [`RunResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Answer,
    Tool,
    InvalidResponse,
    MaxIterations,
}

/// Terminal value of one executor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cognitive: Vec<CognitiveStep>,
    /// The raw decision, kept for diagnosis when it could not be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RunResult {
    pub fn answer(message: String, thought: Option<String>, iterations: u32) -> Self {
        Self {
            success: true,
            outcome: RunOutcome::Answer,
            message: Some(message),
            result: None,
            tool_used: None,
            thought,
            iterations,
            cognitive: Vec::new(),
            data: None,
        }
    }

    pub fn tool(
        outcome: ToolOutcome,
        tool: String,
        thought: Option<String>,
        iterations: u32,
        cognitive: Vec<CognitiveStep>,
    ) -> Self {
        Self {
            success: true,
            outcome: RunOutcome::Tool,
            message: None,
            result: Some(outcome),
            tool_used: Some(tool),
            thought,
            iterations,
            cognitive,
            data: None,
        }
    }

    pub fn invalid(raw: Value, iterations: u32) -> Self {
        Self {
            success: false,
            outcome: RunOutcome::InvalidResponse,
            message: Some(INVALID_RESPONSE.to_string()),
            result: None,
            tool_used: None,
            thought: None,
            iterations,
            cognitive: Vec::new(),
            data: Some(raw),
        }
    }

    pub fn exhausted(iterations: u32) -> Self {
        Self {
            success: false,
            outcome: RunOutcome::MaxIterations,
            message: Some(MAX_ITERATIONS_REACHED.to_string()),
            result: None,
            tool_used: None,
            thought: None,
            iterations,
            cognitive: Vec::new(),
            data: None,
        }
    }

    /// Text to show the user: the answer, else the tool's own message.
    pub fn display_text(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or_else(|| self.result.as_ref().and_then(|r| r.get_str("message")))
    }
}
