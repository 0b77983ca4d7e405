//! The bounded decision loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use muse_core::config::Config;
use muse_core::types::{AgentInput, ConversationTurn, ExecutionContext};
use muse_providers::{
    ChatOptions, JSON_ONLY_INSTRUCTION, ProviderError, SharedClient, decode_json_or_fallback,
};
use muse_tools::{ToolError, ToolOutcome, ToolRegistry};

use crate::decision::ModelDecision;
use crate::events::{EventSink, StreamEvent};
use crate::narrator;
use crate::observer::{LoggingObserver, ToolObserver};
use crate::prompt::{self, DEFAULT_SYSTEM_PROMPT};
use crate::workflow::{self, Workflow};
use crate::{AgentError, RunOutcome, RunResult};

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Pacing of the streaming variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Emit one `progress` event per this many received chunks.
    pub progress_every: u32,
    /// Pause between synthetic answer tokens.
    pub token_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            progress_every: 50,
            token_delay: Duration::from_millis(15),
        }
    }
}

/// Drives one user turn to a [`RunResult`].
///
/// The executor holds no per-run state; everything a run accumulates lives
/// in the prompt turns it builds and the [`ExecutionContext`] it is given,
/// so one instance can serve concurrent runs.
#[derive(Clone)]
pub struct AgentExecutor {
    client: SharedClient,
    tools: Arc<ToolRegistry>,
    options: ChatOptions,
    role: String,
    max_iterations: u32,
    workflow: Workflow,
    observers: Vec<Arc<dyn ToolObserver>>,
    stream: StreamSettings,
}

/// What one loop iteration decided.
enum Step {
    Done(RunResult),
    Continue,
}

impl AgentExecutor {
    pub fn new(client: SharedClient, tools: Arc<ToolRegistry>) -> Self {
        Self {
            client,
            tools,
            options: ChatOptions::default(),
            role: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            workflow: Workflow::default(),
            observers: Vec::new(),
            stream: StreamSettings::default(),
        }
    }

    pub fn from_config(config: &Config, client: SharedClient, tools: Arc<ToolRegistry>) -> Self {
        let mut executor = Self::new(client, tools)
            .with_options(ChatOptions::from_config(config))
            .with_max_iterations(config.max_iterations())
            .with_stream_settings(StreamSettings {
                progress_every: config.stream_progress_every(),
                token_delay: Duration::from_millis(config.token_delay_ms()),
            })
            .with_observer(Arc::new(LoggingObserver));
        if let Some(role) = config.system_prompt() {
            executor = executor.with_system_prompt(role);
        }
        executor
    }

    /// Iteration budget; clamped to at least one.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Role description placed ahead of the tool catalogue.
    pub fn with_system_prompt(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ToolObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_stream_settings(mut self, settings: StreamSettings) -> Self {
        self.stream = StreamSettings {
            progress_every: settings.progress_every.max(1),
            ..settings
        };
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    pub fn system_prompt(&self) -> String {
        prompt::build_system_prompt(&self.role, &self.tools)
    }

    /// Prompt the first model call of a run will see.
    pub fn initial_turns(
        &self,
        input: &AgentInput,
        context: &ExecutionContext,
    ) -> Vec<ConversationTurn> {
        prompt::build_turns(&self.system_prompt(), input, context)
    }

    /// Run to a terminal result. Provider failures propagate; every other
    /// failure comes back as an unsuccessful [`RunResult`].
    pub async fn run(
        &self,
        input: &AgentInput,
        context: &mut ExecutionContext,
    ) -> Result<RunResult, AgentError> {
        let result = self
            .drive(input, context, &EventSink::disabled(), false)
            .await;
        if let Err(e) = &result {
            error!(error = %e, "Agent run failed");
        }
        result
    }

    /// Same loop as [`run`](Self::run), reporting each transition on `sink`.
    ///
    /// A successful run ends with `complete`. A provider failure emits an
    /// `error` event and is also returned, so callers must not report it a
    /// second time.
    pub async fn run_stream(
        &self,
        input: &AgentInput,
        context: &mut ExecutionContext,
        sink: &EventSink,
    ) -> Result<RunResult, AgentError> {
        match self.drive(input, context, sink, true).await {
            Ok(result) => {
                if let Some(text) = streamed_answer(&result) {
                    self.stream_answer(text, sink).await;
                }
                sink.emit(StreamEvent::Complete(result.clone()));
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, "Agent stream failed");
                sink.emit(StreamEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        input: &AgentInput,
        context: &mut ExecutionContext,
        sink: &EventSink,
        streaming: bool,
    ) -> Result<RunResult, AgentError> {
        let mut turns = self.initial_turns(input, context);
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;
            debug!(iteration = iterations, turns = turns.len(), "Agent loop iteration");

            let raw = if streaming {
                self.decide_streaming(&turns, sink).await?
            } else {
                self.client
                    .chat_json(&turns, &self.options, json!({}))
                    .await?
            };

            match self
                .step(raw, &mut turns, context, sink, iterations)
                .await
            {
                Step::Done(result) => return Ok(result),
                Step::Continue => {}
            }
        }

        warn!(iterations, "Max iterations reached");
        Ok(RunResult::exhausted(iterations))
    }

    async fn step(
        &self,
        raw: Value,
        turns: &mut Vec<ConversationTurn>,
        context: &mut ExecutionContext,
        sink: &EventSink,
        iteration: u32,
    ) -> Step {
        let decision = match ModelDecision::parse(&raw) {
            Ok(d) => d,
            Err(e) => {
                warn!(iteration, error = %e, "Model returned an unusable decision");
                return Step::Done(RunResult::invalid(raw, iteration));
            }
        };

        let (thought, tool, params) = match &decision {
            ModelDecision::Answer {
                thought,
                final_answer,
            } => {
                if thought.is_some() {
                    sink.emit(StreamEvent::Thinking {
                        thought: thought.clone(),
                        steps: Vec::new(),
                    });
                }
                info!(iteration, "Final answer");
                return Step::Done(RunResult::answer(
                    final_answer.clone(),
                    thought.clone(),
                    iteration,
                ));
            }
            ModelDecision::Action {
                thought,
                tool,
                params,
            } => (thought, tool, params),
        };

        let steps = narrator::narrate(tool, params, context);
        sink.emit(StreamEvent::Thinking {
            thought: thought.clone(),
            steps: steps.clone(),
        });
        sink.emit(StreamEvent::ToolCall {
            tool: tool.clone(),
            params: params.clone(),
        });

        let outcome = self.dispatch(tool, params.clone(), context).await;
        sink.emit(StreamEvent::ToolResult {
            tool: tool.clone(),
            success: outcome.is_success(),
            result: outcome.clone().into_value(),
        });

        if outcome.is_success() {
            emit_artifacts(sink, &outcome);
            if let Some(next) = self.workflow.continuation(tool, &outcome, context) {
                info!(iteration, %tool, rule = next.rule, "Continuing workflow");
                turns.push(ConversationTurn::assistant(decision.to_turn_content()));
                turns.push(ConversationTurn::user(next.message));
                sink.emit(StreamEvent::Message {
                    text: format!("{tool} complete, continuing to the next step..."),
                });
                return Step::Continue;
            }
            info!(iteration, %tool, "Tool completed the run");
            return Step::Done(RunResult::tool(
                outcome,
                tool.clone(),
                thought.clone(),
                iteration,
                steps,
            ));
        }

        warn!(
            iteration,
            %tool,
            error = outcome.error_message().unwrap_or("unknown"),
            "Tool failed, retrying"
        );
        turns.push(ConversationTurn::assistant(decision.to_turn_content()));
        turns.push(ConversationTurn::user(format!(
            "Tool failed: {}. Try again or use a different approach.",
            Value::Object(outcome.as_map().clone())
        )));
        sink.emit(StreamEvent::Message {
            text: format!("{tool} failed, trying a different approach..."),
        });
        Step::Continue
    }

    /// Dispatch by name. Unknown tools and raised errors become `{error}`
    /// outcomes; observers only see tools that exist.
    async fn dispatch(
        &self,
        tool: &str,
        params: Value,
        context: &mut ExecutionContext,
    ) -> ToolOutcome {
        if !self.tools.has(tool) {
            warn!(tool, "Model asked for an unregistered tool");
            return ToolOutcome::error(ToolError::NotFound(tool.to_string()).to_string());
        }

        for observer in &self.observers {
            observer.on_tool_call(tool, &params);
        }
        let outcome = match self.tools.execute(tool, params, context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(tool, error = %e, "Tool raised an error");
                ToolOutcome::error(e.to_string())
            }
        };
        for observer in &self.observers {
            observer.on_tool_result(tool, &outcome);
        }
        outcome
    }

    /// Accumulate a streamed decision, reporting progress every
    /// `progress_every` chunks, and decode it once the stream ends.
    async fn decide_streaming(
        &self,
        turns: &[ConversationTurn],
        sink: &EventSink,
    ) -> Result<Value, ProviderError> {
        sink.emit(StreamEvent::progress("reasoning", "Thinking..."));

        let mut prompt = Vec::with_capacity(turns.len() + 1);
        prompt.push(ConversationTurn::system(JSON_ONLY_INSTRUCTION));
        prompt.extend_from_slice(turns);

        let mut stream = self.client.chat_stream(&prompt, &self.options).await?;
        let mut text = String::new();
        let mut chunks: u32 = 0;
        while let Some(delta) = stream.next().await {
            text.push_str(&delta?);
            chunks += 1;
            if chunks % self.stream.progress_every == 0 {
                sink.emit(StreamEvent::Progress {
                    stage: "streaming".into(),
                    message: format!("Received {chunks} chunks"),
                    chunks: Some(chunks),
                });
            }
        }
        debug!(chunks, bytes = text.len(), "Decision stream finished");
        Ok(decode_json_or_fallback(&text, json!({})))
    }

    /// Re-emit a finished answer word by word.
    async fn stream_answer(&self, text: &str, sink: &EventSink) {
        sink.emit(StreamEvent::AnswerStart);
        for word in text.split_inclusive(' ') {
            sink.emit(StreamEvent::Token {
                text: word.to_string(),
            });
            if !self.stream.token_delay.is_zero() {
                tokio::time::sleep(self.stream.token_delay).await;
            }
        }
        sink.emit(StreamEvent::AnswerEnd);
    }
}

/// Text worth "typing" out: a final answer or a plain-text reply tool result.
fn streamed_answer(result: &RunResult) -> Option<&str> {
    match result.outcome {
        RunOutcome::Answer => result.message.as_deref(),
        RunOutcome::Tool => result
            .result
            .as_ref()
            .filter(|r| r.get_str("type") == Some("text"))
            .and_then(|r| r.get_str("message")),
        _ => None,
    }
}

/// Surface artifacts carried by a successful outcome.
fn emit_artifacts(sink: &EventSink, outcome: &ToolOutcome) {
    if let Some(post_id) = outcome.get("postId") {
        sink.emit(StreamEvent::Scheduled {
            post_id: post_id.clone(),
            scheduled_at: outcome.get_str("scheduledAt").map(str::to_string),
            message: outcome.get_str("message").map(str::to_string),
        });
    } else if let Some(accounts) = outcome.get("accounts") {
        sink.emit(StreamEvent::Accounts {
            accounts: accounts.clone(),
            count: accounts.as_array().map_or(0, Vec::len),
        });
    } else if let Some(url) = workflow::resolve_image_url(outcome) {
        let images = outcome
            .get("images")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(workflow::image_entry_url)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        sink.emit(StreamEvent::Image { url, images });
    }
}
