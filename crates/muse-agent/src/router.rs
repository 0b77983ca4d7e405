//! Intent router: one cheap classification call before the main loop.
//!
//! Output is coerced into a closed set of intents and passed through a
//! confidence gate. A decision that needs clarification must stop the
//! caller before the executor runs.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use muse_core::config::Config;
use muse_core::types::{ConversationTurn, HistoryMessage, Intent, Role};
use muse_providers::{ChatOptions, ProviderError, SharedClient};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_HISTORY_WINDOW: usize = 5;

/// Confidence assumed when the model omits it.
const MISSING_CONFIDENCE: f64 = 0.5;

const ROUTER_SYSTEM_PROMPT: &str = r#"You are a Router Agent.

Your ONLY job is to classify the user's intent. You do not generate content,
images, captions or schedules, and you do not call tools. You ONLY return a
JSON object.

INTENTS (exact values):
- generate_image
- edit_image
- schedule_post
- generate_and_post (compound: create an image AND post it)
- website_content (the user gives a URL and wants content based on it)
- deep_research (the user explicitly asks for research, analysis or comparison)
- chat

CLASSIFICATION RULES (priority order):
1. A URL or website plus a request for content, a post or an image -> website_content
2. Explicit research, analyze, compare or report requests -> deep_research
3. Content automation for an account ("create content for my account",
   "generate a new post", "make stories for my page") -> generate_and_post
4. Both create/generate/make an image AND post/publish/schedule -> generate_and_post
5. Only create/generate/make an image, no posting -> generate_image
6. Only edit/change/modify/replace -> edit_image
7. Only post/publish/schedule an existing image -> schedule_post
8. Short conversational replies ("yes", "ok", "thanks", "hi") -> chat
9. Unclear intent -> needs_clarification = true

Never ignore the "post" part of a compound request. Never guess.

OUTPUT (JSON only, no markdown):
{
  "intent": "generate_image | edit_image | schedule_post | generate_and_post | website_content | deep_research | chat",
  "confidence": 0.0,
  "needs_clarification": false,
  "extracted_url": "URL if one was detected, else null",
  "reason": "short explanation"
}"#;

/// Gated router output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterDecision {
    pub intent: Intent,
    pub confidence: f64,
    pub needs_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_url: Option<String>,
    #[serde(default)]
    pub reason: String,
}

impl RouterDecision {
    /// Coerce raw model output and apply the confidence gate.
    ///
    /// Unknown intents become `chat`. Confidence below `threshold` forces
    /// `needs_clarification`; a flag the model set itself is never cleared.
    pub fn from_model_output(raw: &Value, threshold: f64) -> Self {
        let intent = match raw.get("intent").and_then(Value::as_str) {
            Some(label) => label.parse().unwrap_or_else(|_| {
                warn!(intent = label, "Unknown intent, defaulting to chat");
                Intent::Chat
            }),
            None => Intent::Chat,
        };

        let confidence = raw
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(MISSING_CONFIDENCE)
            .clamp(0.0, 1.0);

        let mut needs_clarification = raw
            .get("needs_clarification")
            .or_else(|| raw.get("needsClarification"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if confidence < threshold && !needs_clarification {
            info!(%intent, confidence, threshold, "Low confidence, asking for clarification");
            needs_clarification = true;
        }

        let extracted_url = raw
            .get("extracted_url")
            .or_else(|| raw.get("extractedUrl"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty() && *u != "null")
            .map(str::to_string);

        Self {
            intent,
            confidence,
            needs_clarification,
            extracted_url,
            reason: raw
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub fn clarification_question(&self) -> &'static str {
        clarification_question(self.intent)
    }
}

/// Canned clarification question for an intent.
pub fn clarification_question(intent: Intent) -> &'static str {
    match intent {
        Intent::GenerateImage => "What kind of image would you like me to create?",
        Intent::EditImage => "Please upload or specify which image you'd like me to edit.",
        Intent::SchedulePost => "Which platform and when would you like to schedule this post?",
        Intent::WebsiteContent => "What's the website URL you'd like me to create content for?",
        Intent::DeepResearch => "What topic would you like me to research?",
        Intent::GenerateAndPost | Intent::Chat => {
            "Could you tell me more about what you need help with?"
        }
    }
}

fn fallback_output() -> Value {
    json!({
        "intent": "chat",
        "confidence": MISSING_CONFIDENCE,
        "needs_clarification": false,
        "reason": "fallback",
    })
}

pub struct IntentRouter {
    client: SharedClient,
    options: ChatOptions,
    threshold: f64,
    history_window: usize,
}

impl IntentRouter {
    pub fn new(client: SharedClient) -> Self {
        Self {
            client,
            options: ChatOptions {
                model: None,
                temperature: 0.1,
                max_tokens: 300,
            },
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn from_config(config: &Config, client: SharedClient) -> Self {
        Self::new(client)
            .with_model(config.router_model())
            .with_threshold(config.confidence_threshold())
            .with_history_window(config.router_history_window())
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.options.model = model;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classifier prompt: system rules, recent history, then the message.
    pub fn build_turns(&self, message: &str, history: &[HistoryMessage]) -> Vec<ConversationTurn> {
        let mut turns = vec![ConversationTurn::system(ROUTER_SYSTEM_PROMPT)];
        let start = history.len().saturating_sub(self.history_window);
        for msg in &history[start..] {
            let content = if msg.image_url.is_some() {
                "[Image was shared]".to_string()
            } else {
                msg.content_text()
            };
            turns.push(match msg.role {
                Role::Assistant => ConversationTurn::assistant(content),
                _ => ConversationTurn::user(content),
            });
        }
        turns.push(ConversationTurn::user(message));
        turns
    }

    /// Classify one message. Malformed model output degrades to the gated
    /// fallback; only transport failures are errors.
    pub async fn classify(
        &self,
        message: &str,
        history: &[HistoryMessage],
    ) -> Result<RouterDecision, ProviderError> {
        let turns = self.build_turns(message, history);
        let raw = self
            .client
            .chat_json(&turns, &self.options, fallback_output())
            .await?;
        let decision = RouterDecision::from_model_output(&raw, self.threshold);
        info!(
            intent = %decision.intent,
            confidence = decision.confidence,
            needs_clarification = decision.needs_clarification,
            "Intent classified"
        );
        Ok(decision)
    }
}
