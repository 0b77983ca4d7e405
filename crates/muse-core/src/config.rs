//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Muse configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider id: "openrouter" (default), "openai", "anthropic", "ollama".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    /// Role description placed at the top of the system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Emit one streaming progress event every N received chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_progress_every: Option<u32>,

    /// Delay between synthetic answer tokens in the streaming path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_delay_ms: Option<u64>,

    /// Provider ids tried in order when the primary provider fails.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Model used for classification; falls back to the agent model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_window: Option<usize>,
}

fn default_true() -> bool {
    true
}

// --- Typed provider config ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// Configuration for a single LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Tool backends ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_generation: Option<ServiceEndpointConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<ServiceEndpointConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<WebsiteConfig>,
}

/// An HTTP service a tool delegates to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpointConfig {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_service_timeout")]
    pub timeout_ms: u64,
}

fn default_service_timeout() -> u64 {
    120_000
}

impl ServiceEndpointConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteConfig {
    #[serde(default = "default_website_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

impl Default for WebsiteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_website_timeout(),
            max_words: default_max_words(),
        }
    }
}

fn default_website_timeout() -> u64 {
    5_000
}

fn default_max_words() -> usize {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    8787
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Buffered entries before a flush.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_threshold: Option<usize>,

    /// Most entries held while the sink is failing; the oldest are dropped beyond it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buffered: Option<usize>,

    /// Directory for `telemetry-YYYY-MM-DD.jsonl` files (default: data dir / "logs").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "muse_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::MuseError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::MuseError::Io)?;
        Self::from_json5(&raw)
    }

    /// Parse config text (JSON5) after `${ENV_VAR}` substitution.
    pub fn from_json5(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw)?;
        json5::from_str(&substituted).map_err(|e| crate::error::MuseError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    fn agent_field<T>(&self, f: impl FnOnce(&AgentConfig) -> Option<T>) -> Option<T> {
        self.agent.as_ref().and_then(f)
    }

    /// Provider id used by the agent.
    pub fn provider_id(&self) -> String {
        self.agent_field(|a| a.provider.clone())
            .unwrap_or_else(|| "openrouter".to_string())
    }

    /// Model for the agent: explicit agent model, then the provider's configured default.
    /// `None` leaves the choice to the provider client.
    pub fn model(&self) -> Option<String> {
        self.agent_field(|a| a.model.clone()).or_else(|| {
            self.provider(&self.provider_id())
                .and_then(|p| p.default_model.clone())
        })
    }

    /// Model for the intent router.
    pub fn router_model(&self) -> Option<String> {
        self.router
            .as_ref()
            .and_then(|r| r.model.clone())
            .or_else(|| self.model())
    }

    pub fn fallback_providers(&self) -> Vec<String> {
        self.agent_field(|a| Some(a.fallback.clone()))
            .unwrap_or_default()
    }

    pub fn router_enabled(&self) -> bool {
        self.router.as_ref().is_none_or(|r| r.enabled)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.router
            .as_ref()
            .and_then(|r| r.confidence_threshold)
            .unwrap_or(0.8)
    }

    pub fn router_history_window(&self) -> usize {
        self.router
            .as_ref()
            .and_then(|r| r.history_window)
            .unwrap_or(5)
    }

    pub fn max_iterations(&self) -> u32 {
        self.agent_field(|a| a.max_iterations).unwrap_or(3)
    }

    pub fn system_prompt(&self) -> Option<String> {
        self.agent_field(|a| a.system_prompt.clone())
    }

    pub fn temperature(&self) -> f64 {
        self.agent_field(|a| a.temperature).unwrap_or(0.7)
    }

    pub fn max_tokens(&self) -> u32 {
        self.agent_field(|a| a.max_tokens).unwrap_or(4096)
    }

    pub fn stream_progress_every(&self) -> u32 {
        self.agent_field(|a| a.stream_progress_every)
            .unwrap_or(50)
            .max(1)
    }

    pub fn token_delay_ms(&self) -> u64 {
        self.agent_field(|a| a.token_delay_ms).unwrap_or(15)
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8787)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn telemetry_flush_threshold(&self) -> usize {
        self.telemetry
            .as_ref()
            .and_then(|t| t.flush_threshold)
            .unwrap_or(10)
    }

    pub fn telemetry_max_buffered(&self) -> usize {
        self.telemetry
            .as_ref()
            .and_then(|t| t.max_buffered)
            .unwrap_or(1000)
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.telemetry
            .as_ref()
            .and_then(|t| t.dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("logs"))
    }

    pub fn website(&self) -> WebsiteConfig {
        self.tools
            .as_ref()
            .and_then(|t| t.website.clone())
            .unwrap_or_default()
    }

    /// Find a provider config by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.iter().find(|pc| pc.id == id))
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "agent.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(providers) = self.models.as_ref().and_then(|m| m.providers.as_ref()) {
            for p in providers {
                if p.id != "ollama" && p.resolve_api_key().is_none() {
                    warnings.push(format!("Provider '{}' has no API key configured", p.id));
                }
            }
        }

        if self.max_iterations() == 0 {
            errors.push("agent.max_iterations must be at least 1".to_string());
        }

        let threshold = self.confidence_threshold();
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(format!(
                "router.confidence_threshold must be within [0, 1], got {threshold}"
            ));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Muse data: `~/.muse/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".muse")
}
