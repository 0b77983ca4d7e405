//! Failover client: wraps several clients in priority order.
//!
//! On error (rate limit, auth failure, timeout), falls back to the next
//! client in the list.

use async_trait::async_trait;
use tracing::{info, warn};

use muse_core::types::ConversationTurn;

use crate::{ChatOptions, LanguageModelClient, ProviderError, SharedClient, TokenStream};

/// A client that tries multiple underlying clients in order.
pub struct FailoverClient {
    clients: Vec<SharedClient>,
    label: String,
}

impl FailoverClient {
    /// The first client is primary; others are fallbacks.
    pub fn new(label: impl Into<String>, clients: Vec<SharedClient>) -> Self {
        Self {
            clients,
            label: label.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn no_clients(&self) -> ProviderError {
        ProviderError::UnknownProvider(format!("{} (no clients configured)", self.label))
    }
}

#[async_trait]
impl LanguageModelClient for FailoverClient {
    fn id(&self) -> &str {
        &self.label
    }

    async fn chat(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let mut last_error = None;

        for (i, client) in self.clients.iter().enumerate() {
            match client.chat(turns, options).await {
                Ok(text) => {
                    if i > 0 {
                        info!(provider = client.id(), attempt = i + 1, "Failover succeeded");
                    }
                    return Ok(text);
                }
                Err(e) => {
                    warn!(provider = client.id(), attempt = i + 1, %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| self.no_clients()))
    }

    async fn chat_stream(
        &self,
        turns: &[ConversationTurn],
        options: &ChatOptions,
    ) -> Result<TokenStream, ProviderError> {
        let mut last_error = None;

        for (i, client) in self.clients.iter().enumerate() {
            match client.chat_stream(turns, options).await {
                Ok(stream) => {
                    if i > 0 {
                        info!(provider = client.id(), attempt = i + 1, "Failover succeeded");
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(provider = client.id(), attempt = i + 1, %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| self.no_clients()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        id: &'static str,
        result: Result<&'static str, u16>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn ok(id: &'static str, text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                result: Ok(text),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(id: &'static str, status: u16) -> Arc<Self> {
            Arc::new(Self {
                id,
                result: Err(status),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModelClient for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        async fn chat(
            &self,
            _turns: &[ConversationTurn],
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(text) => Ok(text.to_string()),
                Err(status) => Err(ProviderError::Http {
                    status,
                    body: format!("{} down", self.id),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_failover_uses_first_success() {
        let primary = Fixed::failing("primary", 503);
        let backup = Fixed::ok("backup", "from backup");
        let never = Fixed::ok("never", "unused");
        let client = FailoverClient::new(
            "chain",
            vec![
                primary.clone() as SharedClient,
                backup.clone() as SharedClient,
                never.clone() as SharedClient,
            ],
        );

        let text = client
            .chat(&[ConversationTurn::user("hi")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "from backup");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failover_propagates_last_error() {
        let client = FailoverClient::new(
            "chain",
            vec![
                Fixed::failing("a", 500) as SharedClient,
                Fixed::failing("b", 429) as SharedClient,
            ],
        );
        let err = client
            .chat(&[ConversationTurn::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_failover_empty() {
        let client = FailoverClient::new("empty", vec![]);
        assert!(client.is_empty());
        assert_eq!(client.id(), "empty");
        assert!(client
            .chat(&[ConversationTurn::user("hi")], &ChatOptions::default())
            .await
            .is_err());
    }
}
