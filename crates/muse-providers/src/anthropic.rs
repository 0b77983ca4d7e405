//! Anthropic Messages API client.
//!
//! System turns are lifted into the top-level `system` field; streaming reads
//! `content_block_delta` text deltas until `message_stop`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use muse_core::types::{ConversationTurn, Role};

use crate::sse::parse_sse_response;
use crate::{ChatOptions, LanguageModelClient, ProviderError, TokenStream};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

pub struct AnthropicClient {
    pub base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(base_url: Option<&str>, api_key: String) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            default_model: ANTHROPIC_DEFAULT_MODEL.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body<'a>(
        &'a self,
        turns: &'a [ConversationTurn],
        options: &'a ChatOptions,
        stream: bool,
    ) -> MessagesRequest<'a> {
        let system: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
            .collect();

        let messages = turns
            .iter()
            .filter_map(|t| match t.role {
                Role::System => None,
                Role::User => Some(AnthropicMessage {
                    role: "user",
                    content: &t.content,
                }),
                Role::Assistant => Some(AnthropicMessage {
                    role: "assistant",
                    content: &t.content,
                }),
            })
            .collect();

        MessagesRequest {
            model: options.model.as_deref().unwrap_or(&self.default_model),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        debug!(model = %body.model, stream = body.stream, "Calling Anthropic Messages API");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body });
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// One decoded stream event.
#[derive(Debug, PartialEq)]
enum StreamFrame {
    Text(String),
    Stop,
    Error(String),
    Ignore,
}

fn decode_frame(data: &str) -> StreamFrame {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            trace!(%e, data, "Failed to parse Anthropic event");
            return StreamFrame::Ignore;
        }
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => value
            .pointer("/delta/text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| StreamFrame::Text(t.to_string()))
            .unwrap_or(StreamFrame::Ignore),
        Some("message_stop") => StreamFrame::Stop,
        Some("error") => StreamFrame::Error(
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        ),
        _ => StreamFrame::Ignore,
    }
}

#[async_trait]
impl LanguageModelClient for AnthropicClient {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn chat(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let body = self.request_body(turns, options, false);
        let response = self.send(&body).await?;
        let text = response.text().await?;
        let parsed: MessagesResponse = serde_json::from_str(&text)?;
        Ok(parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn chat_stream(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let body = self.request_body(turns, options, true);
        let response = self.send(&body).await?;

        let sse = Box::pin(parse_sse_response(response));
        let tokens = futures::stream::unfold(Some(sse), |state| async move {
            let mut sse = state?;
            loop {
                match sse.next().await {
                    Some(Ok(event)) => match decode_frame(&event.data) {
                        StreamFrame::Text(text) => return Some((Ok(text), Some(sse))),
                        StreamFrame::Stop => return None,
                        StreamFrame::Error(message) => {
                            return Some((Err(ProviderError::Stream(message)), None));
                        }
                        StreamFrame::Ignore => continue,
                    },
                    Some(Err(e)) => return Some((Err(e), None)),
                    None => return None,
                }
            }
        });

        Ok(Box::pin(tokens))
    }
}
