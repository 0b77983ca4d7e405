//! Parsed model decisions.

use serde_json::{Map, Value, json};

/// One model turn: either a final answer or a tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDecision {
    Answer {
        thought: Option<String>,
        final_answer: String,
    },
    Action {
        thought: Option<String>,
        tool: String,
        params: Value,
    },
}

/// Why a decoded payload is not a usable decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    #[error("decision is not a JSON object")]
    NotAnObject,

    #[error("decision carries neither finalAnswer nor tool")]
    Empty,

    #[error("decision carries both finalAnswer and tool")]
    Ambiguous,
}

impl ModelDecision {
    /// Parse a decoded model payload. Exactly one of `finalAnswer` and a
    /// non-empty `tool` name must be present.
    ///
    /// The `finalAnswer` key counts as present whatever its value, so an
    /// explicit `null` is an empty answer rather than a missing one.
    pub fn parse(value: &Value) -> Result<Self, DecisionError> {
        let obj = value.as_object().ok_or(DecisionError::NotAnObject)?;

        let answer = obj.get("finalAnswer");
        let tool = obj
            .get("tool")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let thought = obj
            .get("thought")
            .and_then(Value::as_str)
            .map(str::to_string);

        match (answer, tool) {
            (Some(_), Some(_)) => Err(DecisionError::Ambiguous),
            (None, None) => Err(DecisionError::Empty),
            (Some(answer), None) => Ok(ModelDecision::Answer {
                thought,
                final_answer: match answer {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
            }),
            (None, Some(tool)) => Ok(ModelDecision::Action {
                thought,
                tool: tool.to_string(),
                params: match obj.get("params") {
                    None | Some(Value::Null) => Value::Object(Map::new()),
                    Some(p) => p.clone(),
                },
            }),
        }
    }

    pub fn thought(&self) -> Option<&str> {
        match self {
            ModelDecision::Answer { thought, .. } | ModelDecision::Action { thought, .. } => {
                thought.as_deref()
            }
        }
    }

    /// Compact JSON replayed as the assistant turn on continuation or retry.
    pub fn to_turn_content(&self) -> String {
        let value = match self {
            ModelDecision::Answer {
                thought,
                final_answer,
            } => json!({ "thought": thought, "finalAnswer": final_answer }),
            ModelDecision::Action {
                thought,
                tool,
                params,
            } => json!({ "thought": thought, "tool": tool, "params": params }),
        };
        value.to_string()
    }
}
