//! Integration tests: drive the executor with a scripted model and
//! recording tools.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use muse_agent::events::{EventSink, StreamEvent};
use muse_agent::executor::StreamSettings;
use muse_agent::{
    AgentError, AgentExecutor, INVALID_RESPONSE, MAX_ITERATIONS_REACHED, ToolObserver,
};
use muse_core::types::{AgentInput, ConversationTurn, ExecutionContext, Intent, Role};
use muse_providers::{ChatOptions, LanguageModelClient, ProviderError, TokenStream};
use muse_tools::{ParamType, ParameterSpec, Tool, ToolOutcome, ToolRegistry};

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

/// Replies from a script in order; the last reply repeats once the script
/// runs out. Every prompt it receives is recorded.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, u16>>>,
    last: Mutex<Option<Result<String, u16>>>,
    prompts: Mutex<Vec<Vec<ConversationTurn>>>,
    /// Split streamed replies into chunks of this many chars.
    chunk_chars: usize,
}

impl ScriptedModel {
    fn new(replies: Vec<Value>) -> Arc<Self> {
        Self::from_results(replies.into_iter().map(|v| Ok(v.to_string())).collect())
    }

    fn from_results(replies: Vec<Result<String, u16>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            chunk_chars: 4,
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, n: usize) -> Vec<ConversationTurn> {
        self.prompts.lock().unwrap()[n].clone()
    }

    fn next_reply(&self, turns: &[ConversationTurn]) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(turns.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(r) => {
                *self.last.lock().unwrap() = Some(r.clone());
                r
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok("{}".into())),
        };
        reply.map_err(|status| ProviderError::Http {
            status,
            body: "upstream exploded".into(),
        })
    }
}

#[async_trait]
impl LanguageModelClient for ScriptedModel {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        turns: &[ConversationTurn],
        _options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        self.next_reply(turns)
    }

    async fn chat_stream(
        &self,
        turns: &[ConversationTurn],
        _options: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let text = self.next_reply(turns)?;
        let chars: Vec<char> = text.chars().collect();
        let chunks: Vec<Result<String, ProviderError>> = chars
            .chunks(self.chunk_chars)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

// ---------------------------------------------------------------------------
// Recording tools
// ---------------------------------------------------------------------------

enum Behavior {
    Outcome(ToolOutcome),
    Raise(&'static str),
}

struct RecordingTool {
    name: &'static str,
    behavior: Behavior,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    fn returning(name: &'static str, outcome: Value) -> Arc<Self> {
        let outcome = match outcome {
            Value::Object(map) => ToolOutcome::from(map),
            _ => ToolOutcome::default(),
        };
        Arc::new(Self {
            name,
            behavior: Behavior::Outcome(outcome),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn raising(name: &'static str, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior: Behavior::Raise(message),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Recording test tool"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::optional("prompt", ParamType::String, "Anything")]
    }

    async fn invoke(
        &self,
        params: Value,
        _context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        self.calls.lock().unwrap().push(params);
        match &self.behavior {
            Behavior::Outcome(outcome) => Ok(outcome.clone()),
            Behavior::Raise(message) => anyhow::bail!("{message}"),
        }
    }
}

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<String>>,
}

impl ToolObserver for RecordingObserver {
    fn on_tool_call(&self, tool: &str, _params: &Value) {
        self.seen.lock().unwrap().push(format!("call:{tool}"));
    }

    fn on_tool_result(&self, tool: &str, outcome: &ToolOutcome) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("result:{tool}:{}", outcome.is_success()));
    }
}

fn registry(tools: &[Arc<RecordingTool>]) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool.clone()).unwrap();
    }
    Arc::new(registry)
}

fn executor(model: &Arc<ScriptedModel>, tools: &[Arc<RecordingTool>]) -> AgentExecutor {
    AgentExecutor::new(model.clone(), registry(tools)).with_stream_settings(StreamSettings {
        progress_every: 2,
        token_delay: std::time::Duration::ZERO,
    })
}

fn last_user_turn(turns: &[ConversationTurn]) -> &str {
    turns
        .iter()
        .rev()
        .find(|t| t.role == Role::User)
        .map(|t| t.content.as_str())
        .unwrap()
}

fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Synchronous path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_simple_chat() {
    let model = ScriptedModel::new(vec![json!({"thought": "greeting", "finalAnswer": "Hi! How can I help?"})]);
    let image = RecordingTool::returning("generate_image", json!({"success": true}));
    let executor = executor(&model, &[image.clone()]);

    let mut ctx = ExecutionContext::for_user("u1");
    let result = executor.run(&AgentInput::text("hello"), &mut ctx).await.unwrap();

    assert!(result.success);
    assert_eq!(result.message.as_deref(), Some("Hi! How can I help?"));
    assert_eq!(result.iterations, 1);
    assert_eq!(image.call_count(), 0);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_single_tool_success() {
    let model = ScriptedModel::new(vec![
        json!({"thought": "draw", "tool": "generate_image", "params": {"prompt": "a cat"}}),
    ]);
    let image = RecordingTool::returning(
        "generate_image",
        json!({"success": true, "imageUrl": "https://x/cat.png"}),
    );
    let executor = executor(&model, &[image.clone()]);

    let mut ctx = ExecutionContext::for_user("u1");
    let result = executor
        .run(&AgentInput::text("make a cat image"), &mut ctx)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.tool_used.as_deref(), Some("generate_image"));
    assert_eq!(
        result.result.as_ref().unwrap().get_str("imageUrl"),
        Some("https://x/cat.png")
    );
    assert_eq!(image.calls.lock().unwrap()[0], json!({"prompt": "a cat"}));
    assert!(!result.cognitive.is_empty());
}

#[tokio::test]
async fn test_chained_generate_and_post() {
    let model = ScriptedModel::new(vec![
        json!({"thought": "draw", "tool": "generate_image", "params": {"prompt": "a cat"}}),
        json!({"thought": "post", "tool": "schedule_post", "params": {"imageUrl": "https://x/a.png", "scheduledTime": "now"}}),
    ]);
    let image = RecordingTool::returning(
        "generate_image",
        json!({"success": true, "images": [{"mimeType": "image/png", "url": "https://x/a.png"}]}),
    );
    let post = RecordingTool::returning(
        "schedule_post",
        json!({"success": true, "postId": "p1", "message": "Posted"}),
    );
    let executor = executor(&model, &[image.clone(), post.clone()]);

    let mut ctx = ExecutionContext::for_user("u1").with_intent(Intent::GenerateAndPost);
    ctx.last_image_url = Some("https://x/stale.png".into());
    let result = executor
        .run(&AgentInput::text("make a cat and post it"), &mut ctx)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.tool_used.as_deref(), Some("schedule_post"));
    assert_eq!(image.call_count(), 1);
    assert_eq!(post.call_count(), 1);
    assert_eq!(ctx.generated_image_url.as_deref(), Some("https://x/a.png"));

    let second = model.prompt(1);
    let n = second.len();
    assert_eq!(second[n - 2].role, Role::Assistant);
    let replayed: Value = serde_json::from_str(&second[n - 2].content).unwrap();
    assert_eq!(replayed["tool"], "generate_image");
    let injected = last_user_turn(&second);
    assert!(injected.contains("https://x/a.png"));
    assert!(!injected.contains("mimeType"));
}

#[tokio::test]
async fn test_website_content_continues_with_brand_context() {
    let model = ScriptedModel::new(vec![
        json!({"tool": "extract_website", "params": {"url": "acme.test"}}),
        json!({"thought": "write", "finalAnswer": "Here is your caption"}),
    ]);
    let site = RecordingTool::returning(
        "extract_website",
        json!({"success": true, "websiteData": {"title": "Acme", "keyPoints": ["Fast"]}}),
    );
    let executor = executor(&model, &[site]);

    let mut ctx = ExecutionContext::for_user("u1").with_intent(Intent::WebsiteContent);
    let result = executor
        .run(&AgentInput::text("post for acme.test"), &mut ctx)
        .await
        .unwrap();

    assert_eq!(result.iterations, 2);
    assert_eq!(result.message.as_deref(), Some("Here is your caption"));
    assert_eq!(ctx.website_data.as_ref().unwrap()["title"], "Acme");
    let injected = model.prompt(1);
    assert!(last_user_turn(&injected).contains("- Title: Acme"));
    assert!(last_user_turn(&injected).contains("- Key Points: Fast"));
}

#[tokio::test]
async fn test_success_without_matching_rule_terminates() {
    for intent in [None, Some(Intent::Chat), Some(Intent::GenerateImage), Some(Intent::WebsiteContent)] {
        let model = ScriptedModel::new(vec![
            json!({"tool": "generate_image", "params": {"prompt": "x"}}),
            json!({"finalAnswer": "should not be reached"}),
        ]);
        let image = RecordingTool::returning(
            "generate_image",
            json!({"success": true, "imageUrl": "https://x/1.png"}),
        );
        let executor = executor(&model, &[image]);
        let mut ctx = ExecutionContext::for_user("u1");
        ctx.router_intent = intent;

        let result = executor.run(&AgentInput::text("x"), &mut ctx).await.unwrap();
        assert_eq!(result.iterations, 1, "{intent:?}");
        assert_eq!(model.calls(), 1);
    }
}

#[tokio::test]
async fn test_exhaustion() {
    let model = ScriptedModel::new(vec![json!({"tool": "generate_image", "params": {}})]);
    let image = RecordingTool::returning("generate_image", json!({"success": false}));
    let executor = executor(&model, &[image.clone()]).with_max_iterations(3);

    let mut ctx = ExecutionContext::for_user("u1");
    let result = executor.run(&AgentInput::text("x"), &mut ctx).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some(MAX_ITERATIONS_REACHED));
    assert_eq!(result.iterations, 3);
    assert_eq!(model.calls(), 3);
    assert_eq!(image.call_count(), 3);
    assert!(last_user_turn(&model.prompt(2)).starts_with("Tool failed: {\"success\":false}"));
}

#[tokio::test]
async fn test_iterations_never_exceed_budget() {
    for budget in 1..=4 {
        let model = ScriptedModel::new(vec![json!({"tool": "missing_tool"})]);
        let executor = executor(&model, &[]).with_max_iterations(budget);
        let mut ctx = ExecutionContext::default();
        let result = executor.run(&AgentInput::text("x"), &mut ctx).await.unwrap();
        assert_eq!(result.iterations, budget);
        assert_eq!(model.calls(), budget as usize);
    }
}

#[tokio::test]
async fn test_protocol_violations_are_bounded_failures() {
    for reply in [json!({"thought": "hmm"}), json!({"finalAnswer": "a", "tool": "generate_image"})] {
        let model = ScriptedModel::new(vec![reply.clone()]);
        let executor = executor(&model, &[]);
        let mut ctx = ExecutionContext::default();
        let result = executor.run(&AgentInput::text("x"), &mut ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some(INVALID_RESPONSE));
        assert_eq!(result.data, Some(reply));
        assert_eq!(result.iterations, 1);
    }
}

#[tokio::test]
async fn test_malformed_model_output_does_not_raise() {
    let model = ScriptedModel::from_results(vec![Ok("Sure, I can help with that!".into())]);
    let executor = executor(&model, &[]);
    let mut ctx = ExecutionContext::default();
    let result = executor.run(&AgentInput::text("x"), &mut ctx).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some(INVALID_RESPONSE));
}

#[tokio::test]
async fn test_unknown_tool_feeds_retry_without_observers() {
    let model = ScriptedModel::new(vec![
        json!({"tool": "nope", "params": {}}),
        json!({"finalAnswer": "recovered"}),
    ]);
    let observer = Arc::new(RecordingObserver::default());
    let executor = executor(&model, &[]).with_observer(observer.clone());

    let mut ctx = ExecutionContext::default();
    let result = executor.run(&AgentInput::text("x"), &mut ctx).await.unwrap();

    assert_eq!(result.message.as_deref(), Some("recovered"));
    assert_eq!(result.iterations, 2);
    assert!(last_user_turn(&model.prompt(1)).contains("Tool not found: nope"));
    assert!(observer.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_raising_tool_becomes_error_outcome() {
    let model = ScriptedModel::new(vec![
        json!({"tool": "generate_image", "params": {"prompt": "x"}}),
        json!({"finalAnswer": "sorry"}),
    ]);
    let image = RecordingTool::raising("generate_image", "disk on fire");
    let observer = Arc::new(RecordingObserver::default());
    let executor = executor(&model, &[image]).with_observer(observer.clone());

    let mut ctx = ExecutionContext::default();
    let result = executor.run(&AgentInput::text("x"), &mut ctx).await.unwrap();

    assert_eq!(result.iterations, 2);
    assert!(last_user_turn(&model.prompt(1)).contains(r#"{"error":"disk on fire"}"#));
    assert_eq!(
        *observer.seen.lock().unwrap(),
        vec!["call:generate_image".to_string(), "result:generate_image:false".to_string()]
    );
}

#[tokio::test]
async fn test_provider_error_propagates() {
    let model = ScriptedModel::from_results(vec![Err(502)]);
    let executor = executor(&model, &[]);
    let mut ctx = ExecutionContext::default();
    let err = executor
        .run(&AgentInput::text("x"), &mut ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::Provider(ProviderError::Http { status: 502, .. })
    ));
}

#[tokio::test]
async fn test_initial_prompt_is_deterministic() {
    let model = ScriptedModel::new(vec![]);
    let image = RecordingTool::returning("generate_image", json!({"success": true}));
    let executor = executor(&model, &[image]);
    let mut ctx = ExecutionContext::for_user("u1");
    ctx.last_image_url = Some("https://x/last.png".into());
    let input = AgentInput {
        message: "edit it".into(),
        images: vec!["ref".into()],
    };

    let first = executor.initial_turns(&input, &ctx);
    assert_eq!(first, executor.initial_turns(&input, &ctx));
    assert!(first[0].content.contains("generate_image: Recording test tool"));
}

// ---------------------------------------------------------------------------
// Streaming path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stream_final_answer_events() {
    let model = ScriptedModel::new(vec![json!({"thought": "greet", "finalAnswer": "Hi there friend"})]);
    let executor = executor(&model, &[]);
    let (sink, rx) = EventSink::channel();

    let mut ctx = ExecutionContext::default();
    let result = executor
        .run_stream(&AgentInput::text("hello"), &mut ctx, &sink)
        .await
        .unwrap();
    drop(sink);
    let events = drain(rx);

    assert_eq!(result.message.as_deref(), Some("Hi there friend"));
    assert_eq!(events.first().map(StreamEvent::kind), Some("progress"));
    assert!(matches!(events.last(), Some(StreamEvent::Complete(r)) if r.success));

    let tokens: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec!["Hi ", "there ", "friend"]);
    assert_eq!(tokens.concat(), "Hi there friend");

    let kinds: Vec<&str> = events.iter().map(StreamEvent::kind).collect();
    let start = kinds.iter().position(|k| *k == "answer_start").unwrap();
    let end = kinds.iter().position(|k| *k == "answer_end").unwrap();
    assert!(start < end);
    assert!(kinds.contains(&"thinking"));
}

#[tokio::test]
async fn test_stream_progress_is_rate_limited() {
    let reply = json!({"finalAnswer": "ok"}).to_string();
    let chunks = reply.chars().count().div_ceil(4) as u32;
    let model = ScriptedModel::from_results(vec![Ok(reply)]);
    let executor = executor(&model, &[]);
    let (sink, rx) = EventSink::channel();

    let mut ctx = ExecutionContext::default();
    executor
        .run_stream(&AgentInput::text("x"), &mut ctx, &sink)
        .await
        .unwrap();
    drop(sink);

    let streaming = drain(rx)
        .into_iter()
        .filter(|e| matches!(e, StreamEvent::Progress { stage, .. } if stage == "streaming"))
        .count() as u32;
    assert_eq!(streaming, chunks / 2);
    assert!(streaming < chunks);
}

#[tokio::test]
async fn test_stream_chained_workflow_events_in_order() {
    let model = ScriptedModel::new(vec![
        json!({"tool": "generate_image", "params": {"prompt": "a cat"}}),
        json!({"tool": "schedule_post", "params": {"imageUrl": "https://x/a.png", "scheduledTime": "now"}}),
    ]);
    let image = RecordingTool::returning(
        "generate_image",
        json!({"success": true, "images": [{"mimeType": "image/png", "url": "https://x/a.png"}]}),
    );
    let post = RecordingTool::returning(
        "schedule_post",
        json!({"success": true, "postId": "p1", "scheduledAt": "2025-01-01T00:01:00Z"}),
    );
    let executor = executor(&model, &[image, post]);
    let (sink, rx) = EventSink::channel();

    let mut ctx = ExecutionContext::for_user("u1").with_intent(Intent::GenerateAndPost);
    let result = executor
        .run_stream(&AgentInput::text("cat, then post"), &mut ctx, &sink)
        .await
        .unwrap();
    drop(sink);
    assert_eq!(result.iterations, 2);

    let kinds: Vec<&str> = drain(rx)
        .iter()
        .map(StreamEvent::kind)
        .filter(|k| *k != "progress")
        .collect();
    assert_eq!(
        kinds,
        vec![
            "thinking",
            "tool_call",
            "tool_result",
            "image",
            "message",
            "thinking",
            "tool_call",
            "tool_result",
            "scheduled",
            "complete",
        ]
    );
}

#[tokio::test]
async fn test_stream_provider_error_ends_with_error_event() {
    let model = ScriptedModel::from_results(vec![Err(500)]);
    let executor = executor(&model, &[]);
    let (sink, rx) = EventSink::channel();

    let mut ctx = ExecutionContext::default();
    let err = executor
        .run_stream(&AgentInput::text("x"), &mut ctx, &sink)
        .await;
    drop(sink);
    assert!(err.is_err());

    let events = drain(rx);
    match events.last() {
        Some(StreamEvent::Error { message }) => assert!(message.contains("500")),
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Complete(_))));
}

#[tokio::test]
async fn test_stream_and_sync_reach_same_result() {
    let script = vec![
        json!({"tool": "generate_image", "params": {}}),
        json!({"finalAnswer": "done"}),
    ];
    let failing = || RecordingTool::returning("generate_image", json!({"success": false, "error": "quota"}));

    let sync_model = ScriptedModel::new(script.clone());
    let mut ctx = ExecutionContext::default();
    let sync = executor(&sync_model, &[failing()])
        .run(&AgentInput::text("x"), &mut ctx)
        .await
        .unwrap();

    let stream_model = ScriptedModel::new(script);
    let mut ctx = ExecutionContext::default();
    let streamed = executor(&stream_model, &[failing()])
        .run_stream(&AgentInput::text("x"), &mut ctx, &EventSink::disabled())
        .await
        .unwrap();

    assert_eq!(sync, streamed);
    assert_eq!(sync.iterations, 2);
}
