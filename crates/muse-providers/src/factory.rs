//! Build clients from configuration.

use std::sync::Arc;

use muse_core::config::Config;
use tracing::info;

use crate::anthropic::AnthropicClient;
use crate::failover::FailoverClient;
use crate::openai::OpenAiClient;
use crate::{ProviderError, SharedClient};

/// Environment variable consulted when a provider has no key configured.
fn default_key_env(provider_id: &str) -> Option<&'static str> {
    match provider_id {
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        _ => None,
    }
}

fn resolve_key(config: &Config, provider_id: &str) -> Option<String> {
    config
        .provider(provider_id)
        .and_then(|p| p.resolve_api_key())
        .or_else(|| {
            default_key_env(provider_id)
                .and_then(|env| std::env::var(env).ok())
                .filter(|k| !k.is_empty())
        })
}

fn require_key(config: &Config, provider_id: &str) -> Result<String, ProviderError> {
    resolve_key(config, provider_id).ok_or_else(|| ProviderError::MissingApiKey {
        provider: provider_id.to_string(),
    })
}

/// Build the client for one provider id.
pub fn build_client_for(config: &Config, provider_id: &str) -> Result<SharedClient, ProviderError> {
    let base_url = config
        .provider(provider_id)
        .and_then(|p| p.base_url.as_deref());

    let client: SharedClient = match provider_id {
        "openrouter" => Arc::new(OpenAiClient::openrouter(
            base_url,
            Some(require_key(config, provider_id)?),
        )),
        "openai" => Arc::new(OpenAiClient::openai(
            base_url,
            Some(require_key(config, provider_id)?),
        )),
        "ollama" => Arc::new(OpenAiClient::ollama(base_url)),
        "anthropic" => Arc::new(AnthropicClient::new(
            base_url,
            require_key(config, provider_id)?,
        )),
        other => return Err(ProviderError::UnknownProvider(other.to_string())),
    };
    Ok(client)
}

/// Build the agent's client: `agent.provider`, wrapped in a failover chain
/// when `agent.fallback` names further providers.
pub fn build_client(config: &Config) -> Result<SharedClient, ProviderError> {
    let primary_id = config.provider_id();
    let primary = build_client_for(config, &primary_id)?;

    let fallback = config.fallback_providers();
    if fallback.is_empty() {
        return Ok(primary);
    }

    let mut clients = vec![primary];
    for id in &fallback {
        clients.push(build_client_for(config, id)?);
    }
    info!(primary = %primary_id, fallback = ?fallback, "Provider failover chain configured");
    Ok(Arc::new(FailoverClient::new(
        format!("failover:{primary_id}"),
        clients,
    )))
}
