//! reply: plain text answer to the user.

use async_trait::async_trait;
use serde_json::{Value, json};

use muse_core::types::ExecutionContext;

use crate::{ParamType, ParameterSpec, Tool, ToolOutcome, str_param};

pub struct ReplyTool;

#[async_trait]
impl Tool for ReplyTool {
    fn name(&self) -> &str {
        "reply"
    }

    fn description(&self) -> &str {
        "Reply to user with a text message. Use this for answering questions, having conversations, providing help, or when no image action is needed."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required(
            "message",
            ParamType::String,
            "The message to send to the user",
        )]
    }

    async fn invoke(
        &self,
        params: Value,
        _context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(message) = str_param(&params, "message") else {
            return Ok(ToolOutcome::failure("message is required"));
        };
        Ok(ToolOutcome::success(json!({
            "message": message,
            "type": "text",
        })))
    }
}
