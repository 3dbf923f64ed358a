//! Client registry: one resilient client per provider name.
//!
//! Clients are constructed once at startup and reused; session setup
//! (connection pools, TLS) is amortized across every conversation.

use co_core::traits::{HealthCheck, HealthStatus, ProviderClient};
use co_core::types::{CircuitState, ProviderHealth};
use config::ProvidersConfig;
use errors::ClientError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::providers::{AnthropicClient, GoogleClient};
use crate::resilient::{ResilientClient, ResilientSettings};

pub struct ClientRegistry {
    clients: HashMap<String, Arc<ResilientClient>>,
    /// Round-robin order, as configured.
    order: Vec<String>,
}

impl ClientRegistry {
    /// Registry over pre-built clients, in rotation order.
    #[must_use]
    pub fn new(clients: Vec<Arc<ResilientClient>>) -> Self {
        let order: Vec<String> = clients.iter().map(|c| c.name().to_string()).collect();
        let clients = clients
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Self { clients, order }
    }

    /// Builds provider implementations from configuration. API keys are
    /// read from the environment variable each spec names.
    pub fn from_config(providers: &ProvidersConfig) -> Result<Self, ClientError> {
        let mut clients = Vec::with_capacity(providers.list.len());

        for spec in &providers.list {
            let api_key = spec
                .api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .unwrap_or_default();
            let timeout = Duration::from_millis(spec.request_timeout_ms);

            let inner: Arc<dyn ProviderClient<Error = ClientError>> = match spec.name.as_str() {
                "anthropic" => Arc::new(AnthropicClient::new(
                    &spec.name,
                    &spec.model,
                    api_key,
                    spec.base_url.clone(),
                    timeout,
                )?),
                "google" => Arc::new(GoogleClient::new(
                    &spec.name,
                    &spec.model,
                    api_key,
                    spec.base_url.clone(),
                    timeout,
                )?),
                other => {
                    return Err(ClientError::UnknownProvider {
                        name: other.to_string(),
                    });
                }
            };

            clients.push(Arc::new(ResilientClient::new(
                inner,
                ResilientSettings::from(spec),
            )));
        }

        Ok(Self::new(clients))
    }

    pub fn get(&self, name: &str) -> Result<Arc<ResilientClient>, ClientError> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::UnknownProvider {
                name: name.to_string(),
            })
    }

    /// Provider names in configured rotation order.
    #[must_use]
    pub fn provider_names(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Passive health aggregation; no provider calls.
    #[must_use]
    pub fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.clients
            .iter()
            .map(|(name, client)| (name.clone(), client.health()))
            .collect()
    }

    /// Active probe of every registered provider.
    pub async fn health_check_all(&self) -> HashMap<String, ProviderHealth> {
        let mut results = HashMap::with_capacity(self.clients.len());
        for (name, client) in &self.clients {
            results.insert(name.clone(), client.health_check().await);
        }
        results
    }
}

#[async_trait::async_trait]
impl HealthCheck for ClientRegistry {
    async fn health(&self) -> HealthStatus {
        let open = self
            .clients
            .values()
            .filter(|c| c.health().circuit_state == CircuitState::Open)
            .count();

        if open == 0 {
            HealthStatus::Healthy
        } else if open < self.clients.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(vec![
            Arc::new(ResilientClient::new(
                Arc::new(MockProvider::new("anthropic")),
                ResilientSettings::default(),
            )),
            Arc::new(ResilientClient::new(
                Arc::new(MockProvider::new("google")),
                ResilientSettings::default(),
            )),
        ])
    }

    #[tokio::test]
    async fn get_returns_registered_clients() {
        let registry = registry();
        assert!(registry.get("anthropic").is_ok());
        assert!(registry.get("google").is_ok());
        assert_eq!(registry.provider_names(), ["anthropic", "google"]);
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error() {
        let registry = registry();
        let err = registry.get("cohere").unwrap_err();
        match err {
            ClientError::UnknownProvider { name } => assert_eq!(name, "cohere"),
            other => panic!("expected UnknownProvider, got {other}"),
        }
    }

    #[tokio::test]
    async fn health_snapshot_covers_all_providers() {
        let registry = registry();
        let snapshot = registry.health_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.values().all(|h| h.circuit_state == CircuitState::Closed));
        assert_eq!(registry.health().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn from_config_rejects_unknown_provider_names() {
        let mut providers = config::ProvidersConfig::default();
        providers.list[0].name = "cohere".to_string();
        providers.list[0].api_key_env = None;
        let result = ClientRegistry::from_config(&providers);
        assert!(matches!(
            result,
            Err(ClientError::UnknownProvider { .. })
        ));
    }
}
