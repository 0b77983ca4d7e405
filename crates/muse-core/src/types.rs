use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Speaker of a single prompt turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the prompt replayed to the model. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Intent labels produced by the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GenerateImage,
    EditImage,
    SchedulePost,
    GenerateAndPost,
    WebsiteContent,
    DeepResearch,
    #[default]
    Chat,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::GenerateImage,
        Intent::EditImage,
        Intent::SchedulePost,
        Intent::GenerateAndPost,
        Intent::WebsiteContent,
        Intent::DeepResearch,
        Intent::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::GenerateImage => "generate_image",
            Intent::EditImage => "edit_image",
            Intent::SchedulePost => "schedule_post",
            Intent::GenerateAndPost => "generate_and_post",
            Intent::WebsiteContent => "website_content",
            Intent::DeepResearch => "deep_research",
            Intent::Chat => "chat",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unknown intent: {s}"))
    }
}

/// A previously persisted chat message, replayed as prompt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub role: Role,
    /// Usually a string; structured payloads are replayed as compact JSON.
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl HistoryMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: serde_json::Value::String(content.into()),
            image_url: None,
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Content rendered as plain text.
    pub fn content_text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// The user turn handed to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInput {
    pub message: String,
    /// Attached image references (URLs or storage keys).
    #[serde(default)]
    pub images: Vec<String>,
}

impl AgentInput {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            images: Vec::new(),
        }
    }
}

impl From<&str> for AgentInput {
    fn from(message: &str) -> Self {
        Self::text(message)
    }
}

/// Mutable state threaded through a single engine run.
///
/// The engine and the tools both write into it (extracted website data,
/// generated artifact URLs). A fresh context must be built for every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image_url: Option<String>,
}

impl ExecutionContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.router_intent = Some(intent);
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    /// Image URLs present in the replayed history, oldest first.
    pub fn history_images(&self) -> Vec<&str> {
        self.history
            .iter()
            .filter_map(|m| m.image_url.as_deref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_round_trips_through_str() {
        for intent in Intent::ALL {
            assert_eq!(intent.as_str().parse::<Intent>(), Ok(intent));
        }
        assert!("post_everything".parse::<Intent>().is_err());
    }

    #[test]
    fn test_intent_serde_snake_case() {
        let json = serde_json::to_string(&Intent::GenerateAndPost).unwrap();
        assert_eq!(json, r#""generate_and_post""#);
    }

    #[test]
    fn test_history_content_text() {
        let text = HistoryMessage::text(Role::User, "hi");
        assert_eq!(text.content_text(), "hi");

        let structured = HistoryMessage {
            role: Role::Assistant,
            content: serde_json::json!({"a": 1}),
            image_url: None,
        };
        assert_eq!(structured.content_text(), r#"{"a":1}"#);
    }

    #[test]
    fn test_context_deserializes_camel_case() {
        let ctx: ExecutionContext = serde_json::from_str(
            r#"{"userId":"u1","lastImageUrl":"https://x/1.png","routerIntent":"website_content",
                "history":[{"role":"assistant","content":"done","imageUrl":"https://x/0.png"}]}"#,
        )
        .unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert_eq!(ctx.router_intent, Some(Intent::WebsiteContent));
        assert_eq!(ctx.history_images(), vec!["https://x/0.png"]);
    }
}
