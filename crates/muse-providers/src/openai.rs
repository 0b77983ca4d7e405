//! OpenAI Chat Completions API client.
//!
//! Serves OpenAI itself and the OpenAI-compatible backends (OpenRouter, Ollama).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use muse_core::types::{ConversationTurn, Role};

use crate::sse::parse_sse_response;
use crate::{ChatOptions, LanguageModelClient, ProviderError, TokenStream};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
const OPENROUTER_DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
const OLLAMA_DEFAULT_MODEL: &str = "llama3.1";

const OPENROUTER_REFERER: &str = "https://github.com/muse-assistant/muse";
const OPENROUTER_TITLE: &str = "Muse";

/// API style determines minor behavior differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    OpenRouter,
    Ollama,
}

pub struct OpenAiClient {
    pub base_url: String,
    pub api_style: ApiStyle,
    provider_id: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    fn new(
        style: ApiStyle,
        id: &str,
        base_url: Option<&str>,
        default_base: &str,
        default_model: &str,
        api_key: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(default_base)
                .trim_end_matches('/')
                .to_string(),
            api_style: style,
            provider_id: id.into(),
            api_key,
            default_model: default_model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(base_url: Option<&str>, api_key: Option<String>) -> Self {
        Self::new(
            ApiStyle::OpenAi,
            "openai",
            base_url,
            OPENAI_BASE_URL,
            OPENAI_DEFAULT_MODEL,
            api_key,
        )
    }

    pub fn openrouter(base_url: Option<&str>, api_key: Option<String>) -> Self {
        Self::new(
            ApiStyle::OpenRouter,
            "openrouter",
            base_url,
            OPENROUTER_BASE_URL,
            OPENROUTER_DEFAULT_MODEL,
            api_key,
        )
    }

    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            ApiStyle::Ollama,
            "ollama",
            base_url,
            OLLAMA_BASE_URL,
            OLLAMA_DEFAULT_MODEL,
            None,
        )
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn request_body<'a>(
        &'a self,
        turns: &'a [ConversationTurn],
        options: &'a ChatOptions,
        stream: bool,
    ) -> OpenAiRequest<'a> {
        OpenAiRequest {
            model: options.model.as_deref().unwrap_or(&self.default_model),
            messages: format_messages(turns),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        }
    }

    async fn send(&self, body: &OpenAiRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        debug!(
            provider = %self.provider_id,
            model = %body.model,
            base_url = %self.base_url,
            stream = body.stream,
            "Calling OpenAI-compatible API"
        );

        let mut req_builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        // Auth differs by style
        if self.api_style != ApiStyle::Ollama {
            let api_key = self
                .api_key
                .as_deref()
                .ok_or_else(|| ProviderError::MissingApiKey {
                    provider: self.provider_id.clone(),
                })?;
            req_builder = req_builder.header("authorization", format!("Bearer {api_key}"));
        }
        if self.api_style == ApiStyle::OpenRouter {
            req_builder = req_builder
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE);
        }

        let response = req_builder.json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body });
        }
        Ok(response)
    }
}

/// Map prompt turns to Chat Completions messages, preserving order.
fn format_messages(turns: &[ConversationTurn]) -> Vec<OpenAiMessage<'_>> {
    turns
        .iter()
        .map(|t| OpenAiMessage {
            role: match t.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &t.content,
        })
        .collect()
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: CompletionMessage,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Text delta carried by one streamed frame, if any.
fn chunk_text(data: &str) -> Option<String> {
    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            trace!(%e, data, "Failed to parse OpenAI chunk");
            return None;
        }
    };
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl LanguageModelClient for OpenAiClient {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn chat(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let body = self.request_body(turns, options, false);
        let response = self.send(&body).await?;
        let text = response.text().await?;
        let completion: ChatCompletion = serde_json::from_str(&text)?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn chat_stream(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let body = self.request_body(turns, options, true);
        let response = self.send(&body).await?;

        let sse = Box::pin(parse_sse_response(response));
        let tokens = futures::stream::unfold(sse, |mut sse| async move {
            loop {
                match sse.next().await {
                    Some(Ok(event)) => {
                        let data = event.data.trim();
                        // OpenAI terminates with "data: [DONE]"
                        if data == "[DONE]" {
                            return None;
                        }
                        if let Some(text) = chunk_text(data) {
                            return Some((Ok(text), sse));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), sse)),
                    None => return None,
                }
            }
        });

        Ok(Box::pin(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_client_creation() {
        let client = OpenAiClient::openai(None, Some("sk".into()));
        assert_eq!(client.id(), "openai");
        assert_eq!(client.base_url, OPENAI_BASE_URL);
        assert_eq!(client.default_model(), OPENAI_DEFAULT_MODEL);
    }

    #[test]
    fn test_openrouter_client_creation() {
        let client = OpenAiClient::openrouter(None, Some("sk".into()));
        assert_eq!(client.id(), "openrouter");
        assert_eq!(client.base_url, OPENROUTER_BASE_URL);
        assert_eq!(client.api_style, ApiStyle::OpenRouter);
    }

    #[test]
    fn test_ollama_client_creation() {
        let client = OpenAiClient::ollama(None);
        assert_eq!(client.id(), "ollama");
        assert_eq!(client.base_url, OLLAMA_BASE_URL);
    }

    #[test]
    fn test_custom_base_url() {
        let client = OpenAiClient::openai(Some("https://my-proxy.example.com/"), None);
        assert_eq!(client.base_url, "https://my-proxy.example.com");
    }

    #[test]
    fn test_request_body_uses_override_model_and_keeps_order() {
        let client = OpenAiClient::openrouter(None, None);
        let turns = vec![
            ConversationTurn::system("rules"),
            ConversationTurn::user("hi"),
            ConversationTurn::assistant("hello"),
        ];
        let options = ChatOptions::default().with_model(Some("x-ai/grok".into()));
        let body = serde_json::to_value(client.request_body(&turns, &options, true)).unwrap();
        assert_eq!(body["model"], "x-ai/grok");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["messages"][2]["role"], "assistant");

        let default_body =
            serde_json::to_value(client.request_body(&turns, &ChatOptions::default(), false))
                .unwrap();
        assert_eq!(default_body["model"], OPENROUTER_DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_reported() {
        let client = OpenAiClient::openai(Some("http://127.0.0.1:9"), None);
        let err = client
            .chat(&[ConversationTurn::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingApiKey { ref provider } if provider == "openai"));
    }

    #[test]
    fn test_chunk_text_extraction() {
        let data = r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(chunk_text(data).as_deref(), Some("Hello"));

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(chunk_text(role_only), None);

        assert_eq!(chunk_text("{not json"), None);
        assert_eq!(chunk_text(r#"{"choices":[]}"#), None);
    }

    #[test]
    fn test_completion_deserialization() {
        let json = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"},"finish_reason":"stop"}]}"#;
        let completion: ChatCompletion = serde_json::from_str(json).unwrap();
        assert_eq!(completion.choices[0].message.content.as_deref(), Some("Hi"));
    }
}
