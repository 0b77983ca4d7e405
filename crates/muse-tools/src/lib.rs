//! Tool registry and built-in tools.
//!
//! Tools are capabilities the model can invoke by name during an agent run.
//! Each tool implements the [`Tool`] trait and reports business failures as
//! [`ToolOutcome`] values rather than errors.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use muse_core::config::Config;
use muse_core::types::ExecutionContext;

pub mod create_variations;
pub mod edit_image;
pub mod extract_website;
pub mod generate_image;
pub mod get_accounts;
pub mod html;
pub mod reply;
pub mod schedule_post;
pub mod service;

/// Registry-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("invalid tool definition: {0}")]
    InvalidDefinition(String),

    /// The tool body raised instead of returning an outcome.
    #[error("{source}")]
    Execution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Declared type of a tool parameter, as shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// One entry of a tool's parameter schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
        }
    }
}

/// Result of one tool invocation: `{success, ...payload}` or `{error}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolOutcome(Map<String, Value>);

impl ToolOutcome {
    /// `{success: true}` merged with the fields of `payload` (an object).
    pub fn success(payload: Value) -> Self {
        let mut map = Map::new();
        map.insert("success".into(), Value::Bool(true));
        if let Value::Object(fields) = payload {
            map.extend(fields);
        }
        Self(map)
    }

    /// A business failure: `{success: false, error}`.
    pub fn failure(error: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("success".into(), Value::Bool(false));
        map.insert("error".into(), Value::String(error.into()));
        Self(map)
    }

    /// A business failure with a user-facing message.
    pub fn failure_with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        let mut outcome = Self::failure(error);
        outcome
            .0
            .insert("message".into(), Value::String(message.into()));
        outcome
    }

    /// Bare `{error}` shape produced at the dispatch boundary.
    pub fn error(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("error".into(), Value::String(message.into()));
        Self(map)
    }

    pub fn is_success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.get_str("error")
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ToolOutcome {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The core tool trait. Every built-in tool implements this.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the model (e.g., "generate_image").
    fn name(&self) -> &str;

    /// Human-readable description for the model.
    fn description(&self) -> &str;

    /// Parameter schema, in display order.
    fn parameters(&self) -> Vec<ParameterSpec>;

    /// Run the tool. Expected failures come back as `ToolOutcome::failure`;
    /// an `Err` is treated as an unexpected throw by the caller.
    async fn invoke(
        &self,
        params: Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome>;
}

/// Registry of available tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names must be non-empty, free of whitespace and unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<&mut Self, ToolError> {
        let name = tool.name();
        if name.is_empty() {
            return Err(ToolError::InvalidDefinition("tool name is empty".into()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(ToolError::InvalidDefinition(format!(
                "tool name '{name}' contains whitespace"
            )));
        }
        if self.has(name) {
            return Err(ToolError::InvalidDefinition(format!(
                "tool '{name}' is already registered"
            )));
        }
        self.tools.push(tool);
        Ok(self)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch by name. Returns whatever the tool returns; a tool `Err`
    /// becomes [`ToolError::Execution`].
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        context: &mut ExecutionContext,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(params, context)
            .await
            .map_err(|source| ToolError::Execution {
                tool: name.to_string(),
                source,
            })
    }

    /// Render the tool catalogue embedded in the system prompt.
    ///
    /// ```text
    /// name: description
    ///   - param: type (required) - description
    /// ```
    /// Entries are separated by a blank line, in registration order.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, tool) in self.tools.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            let _ = write!(out, "{}: {}", tool.name(), tool.description());
            for p in tool.parameters() {
                let _ = write!(
                    out,
                    "\n  - {}: {}{} - {}",
                    p.name,
                    p.kind.as_str(),
                    if p.required { " (required)" } else { "" },
                    p.description
                );
            }
        }
        out
    }

    /// Machine-readable definitions (`{name, description, parameters}`).
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters(),
                })
            })
            .collect()
    }
}

/// Register the built-in tools, wiring service endpoints from config.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    config: &Config,
) -> Result<(), ToolError> {
    let tools_config = config.tools.clone().unwrap_or_default();
    let scheduler = tools_config
        .scheduler
        .as_ref()
        .map(service::ServiceClient::new)
        .transpose()
        .map_err(|e| ToolError::InvalidDefinition(format!("scheduler service: {e}")))?;
    let images = tools_config
        .image_generation
        .as_ref()
        .map(service::ServiceClient::new)
        .transpose()
        .map_err(|e| ToolError::InvalidDefinition(format!("image service: {e}")))?;

    registry
        .register(Arc::new(reply::ReplyTool))?
        .register(Arc::new(generate_image::GenerateImageTool::new(
            images.clone(),
        )))?
        .register(Arc::new(edit_image::EditImageTool::new(images.clone())))?
        .register(Arc::new(create_variations::CreateVariationsTool::new(
            images,
        )))?
        .register(Arc::new(
            extract_website::ExtractWebsiteTool::new(config.website())
                .map_err(|e| ToolError::InvalidDefinition(format!("extract_website: {e}")))?,
        ))?
        .register(Arc::new(schedule_post::SchedulePostTool::new(
            scheduler.clone(),
        )))?
        .register(Arc::new(get_accounts::GetAccountsTool::new(scheduler)))?;
    Ok(())
}

/// Read a string parameter, treating blank strings as absent.
pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn parameters(&self) -> Vec<ParameterSpec> {
            vec![
                ParameterSpec::required("text", ParamType::String, "Text to echo"),
                ParameterSpec::optional("times", ParamType::Number, "Repeat count"),
            ]
        }

        async fn invoke(
            &self,
            params: Value,
            context: &mut ExecutionContext,
        ) -> anyhow::Result<ToolOutcome> {
            if params.get("boom").is_some() {
                anyhow::bail!("echo exploded");
            }
            context.last_image_url = Some("touched".into());
            Ok(ToolOutcome::success(json!({ "text": params["text"] })))
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "No parameters"
        }

        fn parameters(&self) -> Vec<ParameterSpec> {
            Vec::new()
        }

        async fn invoke(
            &self,
            _params: Value,
            _context: &mut ExecutionContext,
        ) -> anyhow::Result<ToolOutcome> {
            Ok(ToolOutcome::success(json!({})))
        }
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register(Arc::new(Named(""))),
            Err(ToolError::InvalidDefinition(_))
        ));
        assert!(matches!(
            registry.register(Arc::new(Named("two words"))),
            Err(ToolError::InvalidDefinition(_))
        ));
        registry.register(Arc::new(Named("ok"))).unwrap();
        assert!(matches!(
            registry.register(Arc::new(Named("ok"))),
            Err(ToolError::InvalidDefinition(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_describe_is_stable() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(Echo))
            .unwrap()
            .register(Arc::new(Named("ping")))
            .unwrap();

        let expected = "echo: Echo the input back\n  \
                        - text: string (required) - Text to echo\n  \
                        - times: number - Repeat count\n\n\
                        ping: No parameters";
        assert_eq!(registry.describe(), expected);
        assert_eq!(registry.describe(), registry.describe());
        assert_eq!(registry.list(), vec!["echo", "ping"]);
    }

    #[tokio::test]
    async fn test_execute_dispatches_and_mutates_context() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        let mut ctx = ExecutionContext::default();

        let outcome = registry
            .execute("echo", json!({"text": "hi"}), &mut ctx)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.get_str("text"), Some("hi"));
        assert_eq!(ctx.last_image_url.as_deref(), Some("touched"));
    }

    #[tokio::test]
    async fn test_execute_not_found_and_throw() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        let mut ctx = ExecutionContext::default();

        let err = registry
            .execute("missing", json!({}), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Tool not found: missing");

        let err = registry
            .execute("echo", json!({"boom": true}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { ref tool, .. } if tool == "echo"));
        assert_eq!(err.to_string(), "echo exploded");
    }

    #[test]
    fn test_outcome_shapes() {
        let ok = ToolOutcome::success(json!({"imageUrl": "https://x/cat.png"}));
        assert!(ok.is_success());
        assert_eq!(
            ok.clone().into_value(),
            json!({"success": true, "imageUrl": "https://x/cat.png"})
        );

        let failed = ToolOutcome::failure_with_message("bad", "Try again");
        assert!(!failed.is_success());
        assert_eq!(failed.error_message(), Some("bad"));
        assert_eq!(failed.get_str("message"), Some("Try again"));

        let thrown = ToolOutcome::error("kaboom");
        assert!(!thrown.is_success());
        assert_eq!(thrown.into_value(), json!({"error": "kaboom"}));
    }

    #[test]
    fn test_builtin_registration() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, &Config::default()).unwrap();
        assert_eq!(
            registry.list(),
            vec![
                "reply",
                "generate_image",
                "edit_image",
                "create_variations",
                "extract_website",
                "schedule_post",
                "get_accounts"
            ]
        );
    }
}
