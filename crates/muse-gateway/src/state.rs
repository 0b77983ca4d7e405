//! Gateway shared state.

use std::sync::Arc;

use tracing::{info, warn};

use muse_agent::telemetry::TelemetryObserver;
use muse_agent::{AgentExecutor, IntentRouter, RouterDecision, Telemetry};
use muse_core::config::Config;
use muse_core::types::HistoryMessage;
use muse_tools::{ToolRegistry, register_builtin_tools};

/// Shared state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub executor: AgentExecutor,
    pub router: Option<IntentRouter>,
    pub telemetry: Option<Arc<Telemetry>>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, executor: AgentExecutor) -> Self {
        Self {
            config,
            executor,
            router: None,
            telemetry: None,
        }
    }

    pub fn with_router(mut self, router: IntentRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Wire provider, tools, executor, router and telemetry from config.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let client = muse_providers::build_client(&config)?;

        let mut tools = ToolRegistry::new();
        register_builtin_tools(&mut tools, &config)?;
        info!(tools = ?tools.list(), "Tools registered");

        let executor = AgentExecutor::from_config(&config, client.clone(), Arc::new(tools));
        let mut state = Self::new(config.clone(), executor)
            .with_telemetry(Arc::new(Telemetry::from_config(&config)));
        if config.router_enabled() {
            state = state.with_router(IntentRouter::from_config(&config, client));
        }
        Ok(state)
    }

    /// Executor for one request, reporting its tool calls to telemetry.
    pub fn executor_for(&self, user_id: &str) -> AgentExecutor {
        match &self.telemetry {
            Some(telemetry) => self.executor.clone().with_observer(Arc::new(
                TelemetryObserver::new(telemetry.clone(), Some(user_id.to_string())),
            )),
            None => self.executor.clone(),
        }
    }

    /// Classify a message when the router is enabled. Router failures are
    /// logged and the request proceeds unrouted.
    pub async fn route(
        &self,
        user_id: &str,
        message: &str,
        history: &[HistoryMessage],
    ) -> Option<RouterDecision> {
        let router = self.router.as_ref()?;
        match router.classify(message, history).await {
            Ok(decision) => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.log_intent(Some(user_id), message, &decision);
                    if decision.needs_clarification {
                        telemetry.log_clarification(
                            Some(user_id),
                            message,
                            decision.clarification_question(),
                            &decision,
                        );
                    }
                }
                Some(decision)
            }
            Err(e) => {
                warn!(error = %e, "Intent routing failed, continuing without an intent");
                None
            }
        }
    }

    /// Flush buffered telemetry, e.g. on shutdown.
    pub async fn flush_telemetry(&self) {
        if let Some(telemetry) = &self.telemetry {
            match telemetry.flush().await {
                Ok(n) if n > 0 => info!(entries = n, "Telemetry flushed"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Telemetry flush failed"),
            }
        }
    }
}
