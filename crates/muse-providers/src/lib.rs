//! Language model client abstraction.
//!
//! Every backend implements [`LanguageModelClient`]: one blocking text call,
//! a structured JSON call that never fails on malformed model output, and a
//! token stream. Vendors are interchangeable behind the trait.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use muse_core::types::ConversationTurn;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod anthropic;
pub mod factory;
pub mod failover;
pub mod json;
pub mod openai;
pub mod sse;

pub use factory::{build_client, build_client_for};
pub use failover::FailoverClient;
pub use json::parse_json_lenient;

/// System turn forced in front of every structured request.
pub const JSON_ONLY_INSTRUCTION: &str =
    "Respond with valid JSON only. No markdown, no explanations.";

/// Errors raised by a language model backend.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no API key configured for provider '{provider}'")]
    MissingApiKey { provider: String },

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Per-call generation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Overrides the client's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

impl ChatOptions {
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn from_config(config: &muse_core::config::Config) -> Self {
        Self {
            model: config.model(),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
        }
    }
}

/// A finite, non-restartable sequence of text deltas.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// The chat-completion contract shared by every backend.
#[async_trait]
pub trait LanguageModelClient: Send + Sync {
    /// Provider identifier (e.g., "openrouter", "anthropic").
    fn id(&self) -> &str;

    /// One blocking completion. Non-2xx responses fail with [`ProviderError::Http`].
    async fn chat(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<String, ProviderError>;

    /// Structured completion. Malformed model output resolves to `fallback`;
    /// only transport and HTTP failures are errors.
    async fn chat_json(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
        fallback: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut prompt = Vec::with_capacity(turns.len() + 1);
        prompt.push(ConversationTurn::system(JSON_ONLY_INSTRUCTION));
        prompt.extend_from_slice(turns);

        let text = self.chat(&prompt, options).await?;
        Ok(decode_json_or_fallback(&text, fallback))
    }

    /// Stream text deltas. The default yields the full `chat` answer once.
    async fn chat_stream(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let text = self.chat(turns, options).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

/// Decode model text as JSON, logging when extraction produced nothing useful.
pub fn decode_json_or_fallback(text: &str, fallback: serde_json::Value) -> serde_json::Value {
    let value = parse_json_lenient(text, fallback);
    let empty = value.as_object().is_some_and(|o| o.is_empty());
    if empty && !text.trim().is_empty() {
        warn!(
            preview = %text.chars().take(200).collect::<String>(),
            "Model returned non-empty text but JSON extraction produced an empty object"
        );
    }
    value
}

/// Shared handle to a client.
pub type SharedClient = Arc<dyn LanguageModelClient>;
