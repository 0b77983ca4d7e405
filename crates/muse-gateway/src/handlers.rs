//! `/agent` and `/agent/stream` handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info};
use uuid::Uuid;

use muse_agent::workflow::resolve_image_url;
use muse_agent::{EventSink, RouterDecision, RunResult, StreamEvent};
use muse_core::types::{AgentInput, ExecutionContext, HistoryMessage};

use crate::state::GatewayState;

/// Body of `POST /agent` and `POST /agent/stream`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default)]
    pub last_image_url: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
}

/// A validated request, ready to run.
struct Prepared {
    user_id: String,
    input: AgentInput,
    context: ExecutionContext,
}

impl AgentRequest {
    fn prepare(self) -> Result<Prepared, Response> {
        let user_id = self.user_id.filter(|u| !u.trim().is_empty());
        let message = self.message.filter(|m| !m.trim().is_empty());
        let (Some(user_id), Some(message)) = (user_id, message) else {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "userId and message are required" })),
            )
                .into_response());
        };

        // New conversations get a fresh chat id so clients can thread replies.
        let chat_id = self
            .chat_id
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let context = ExecutionContext {
            user_id: Some(user_id.clone()),
            chat_id: Some(chat_id),
            history: self.history,
            reference_images: self.reference_images.clone(),
            last_image_url: self.last_image_url,
            ..ExecutionContext::default()
        };
        Ok(Prepared {
            user_id,
            input: AgentInput {
                message,
                images: self.reference_images,
            },
            context,
        })
    }
}

fn clarification_body(decision: &RouterDecision) -> Value {
    json!({
        "success": true,
        "message": decision.clarification_question(),
        "intent": "clarification",
        "routerIntent": decision.intent,
        "confidence": decision.confidence,
    })
}

/// Flatten a run into the response the client renders.
pub fn response_body(result: &RunResult, intent: Option<&RouterDecision>) -> Value {
    let outcome = result.result.as_ref();
    let image_url = outcome.and_then(resolve_image_url);
    let field = |key: &str| outcome.and_then(|o| o.get(key)).cloned();
    let message = result
        .display_text()
        .map(str::to_string)
        .or_else(|| image_url.as_ref().map(|_| "Here is your image.".to_string()))
        .unwrap_or_else(|| "Done.".to_string());

    json!({
        "success": result.success,
        "message": message,
        "intent": intent
            .map(|d| d.intent.to_string())
            .or_else(|| result.tool_used.clone()),
        "imageUrl": image_url,
        "postId": field("postId"),
        "accounts": field("accounts"),
        "iterations": result.iterations,
        "result": result,
    })
}

pub async fn agent_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<AgentRequest>,
) -> Response {
    let Prepared {
        user_id,
        input,
        mut context,
    } = match request.prepare() {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let decision = state
        .route(&user_id, &input.message, &context.history)
        .await;
    if let Some(d) = &decision {
        if d.needs_clarification {
            info!(user_id, intent = %d.intent, "Clarification requested");
            return Json(clarification_body(d)).into_response();
        }
        context.router_intent = Some(d.intent);
    }

    match state.executor_for(&user_id).run(&input, &mut context).await {
        Ok(result) => Json(response_body(&result, decision.as_ref())).into_response(),
        Err(e) => {
            error!(user_id, error = %e, "Agent run failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn agent_stream_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<AgentRequest>,
) -> Response {
    let prepared = match request.prepare() {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let (sink, rx) = EventSink::channel();
    tokio::spawn(stream_run(state, prepared, sink));
    Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Producer side of `/agent/stream`: `init`, routing, engine events, `done`.
async fn stream_run(state: Arc<GatewayState>, prepared: Prepared, sink: EventSink) {
    let Prepared {
        user_id,
        input,
        mut context,
    } = prepared;

    sink.emit(StreamEvent::Init {
        user_id: Some(user_id.clone()),
        chat_id: context.chat_id.clone(),
    });

    if state.router.is_some() {
        sink.emit(StreamEvent::progress("routing", "Understanding your request..."));
    }
    if let Some(decision) = state
        .route(&user_id, &input.message, &context.history)
        .await
    {
        sink.emit(StreamEvent::Intent(decision.clone()));
        if decision.needs_clarification {
            sink.emit(StreamEvent::Clarification {
                question: decision.clarification_question().to_string(),
                intent: decision.intent.to_string(),
            });
            sink.emit(StreamEvent::Done);
            return;
        }
        context.router_intent = Some(decision.intent);
    }

    // A provider failure has already been reported as an `error` event.
    if state
        .executor_for(&user_id)
        .run_stream(&input, &mut context, &sink)
        .await
        .is_ok()
    {
        sink.emit(StreamEvent::Done);
    }
    debug!(user_id, "Stream run finished");
}

fn event_stream(
    rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    UnboundedReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
        });
        Ok(Event::default().data(data))
    })
}
