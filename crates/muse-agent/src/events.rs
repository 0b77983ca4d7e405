//! Stream event vocabulary and the sink the executor emits into.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::RunResult;
use crate::narrator::CognitiveStep;
use crate::router::RouterDecision;

/// One `{type, data}` envelope on the outward stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Init {
        #[serde(rename = "userId")]
        user_id: Option<String>,
        #[serde(rename = "chatId")]
        chat_id: Option<String>,
    },
    Intent(RouterDecision),
    Clarification {
        question: String,
        intent: String,
    },
    Progress {
        stage: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunks: Option<u32>,
    },
    Thinking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        steps: Vec<CognitiveStep>,
    },
    ToolCall {
        tool: String,
        params: Value,
    },
    ToolResult {
        tool: String,
        success: bool,
        result: Value,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
    },
    Scheduled {
        #[serde(rename = "postId")]
        post_id: Value,
        #[serde(rename = "scheduledAt")]
        scheduled_at: Option<String>,
        message: Option<String>,
    },
    Accounts {
        accounts: Value,
        count: usize,
    },
    Message {
        text: String,
    },
    AnswerStart,
    Token {
        text: String,
    },
    AnswerEnd,
    Complete(RunResult),
    Error {
        message: String,
    },
    Done,
}

impl StreamEvent {
    pub fn progress(stage: &str, message: impl Into<String>) -> Self {
        StreamEvent::Progress {
            stage: stage.to_string(),
            message: message.into(),
            chunks: None,
        }
    }

    /// Wire name of the variant (`tool_call`, `answer_start`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Init { .. } => "init",
            StreamEvent::Intent(_) => "intent",
            StreamEvent::Clarification { .. } => "clarification",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Image { .. } => "image",
            StreamEvent::Scheduled { .. } => "scheduled",
            StreamEvent::Accounts { .. } => "accounts",
            StreamEvent::Message { .. } => "message",
            StreamEvent::AnswerStart => "answer_start",
            StreamEvent::Token { .. } => "token",
            StreamEvent::AnswerEnd => "answer_end",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }

    /// Terminal events close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// Outward event channel. Emission never fails: a dropped receiver only
/// means nobody is listening any more.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink paired with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A sink that discards everything (synchronous runs).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn emit(&self, event: StreamEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(event) {
            debug!(event = e.0.kind(), "Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let event = StreamEvent::ToolCall {
            tool: "generate_image".into(),
            params: json!({"prompt": "a cat"}),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "tool_call", "data": {"tool": "generate_image", "params": {"prompt": "a cat"}}})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::AnswerStart).unwrap(),
            json!({"type": "answer_start"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::progress("reasoning", "Thinking...")).unwrap(),
            json!({"type": "progress", "data": {"stage": "reasoning", "message": "Thinking..."}})
        );
    }

    #[test]
    fn test_kind_matches_serialized_type() {
        let events = [
            StreamEvent::Done,
            StreamEvent::Token { text: "hi ".into() },
            StreamEvent::Error { message: "x".into() },
            StreamEvent::Complete(RunResult::exhausted(1)),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order_and_survives_dropped_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(StreamEvent::AnswerStart);
        sink.emit(StreamEvent::Token { text: "a".into() });
        assert_eq!(rx.recv().await, Some(StreamEvent::AnswerStart));
        assert_eq!(rx.recv().await, Some(StreamEvent::Token { text: "a".into() }));

        drop(rx);
        sink.emit(StreamEvent::Done);
        EventSink::disabled().emit(StreamEvent::Done);
    }
}
