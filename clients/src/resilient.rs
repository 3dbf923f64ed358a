//! Resilience wrapper around a provider client.
//!
//! Call path: token bucket, then circuit breaker, then the retried
//! provider call under a per-call timeout. One exhausted call counts as
//! exactly one circuit-breaker failure regardless of how many attempts
//! the retry loop made.

use async_trait::async_trait;
use co_core::traits::ProviderClient;
use co_core::types::{GeneratedTurn, ProviderHealth, Turn};
use config::{ProviderSpec, RateLimitMode};
use errors::ClientError;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSettings};
use crate::rate_limit::TokenBucket;
use crate::retry::{RetrySettings, retry_with_backoff};

#[derive(Debug, Clone)]
pub struct ResilientSettings {
    pub rate_limit_rpm: u32,
    pub rate_limit_mode: RateLimitMode,
    pub rate_limit_max_wait: Duration,
    pub breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub request_timeout: Duration,
}

impl Default for ResilientSettings {
    fn default() -> Self {
        Self {
            rate_limit_rpm: 60,
            rate_limit_mode: RateLimitMode::Block,
            rate_limit_max_wait: Duration::from_secs(10),
            breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ProviderSpec> for ResilientSettings {
    fn from(spec: &ProviderSpec) -> Self {
        Self {
            rate_limit_rpm: spec.rate_limit_rpm,
            rate_limit_mode: spec.rate_limit_mode,
            rate_limit_max_wait: Duration::from_millis(spec.rate_limit_max_wait_ms),
            breaker: CircuitBreakerSettings {
                failure_threshold: spec.circuit_failure_threshold,
                cooldown: Duration::from_secs(spec.circuit_cooldown_seconds),
            },
            retry: RetrySettings {
                max_attempts: spec.retry_max_attempts,
                base_delay_ms: spec.retry_base_delay_ms,
                max_delay_ms: spec.retry_max_delay_ms,
            },
            request_timeout: Duration::from_millis(spec.request_timeout_ms),
        }
    }
}

pub struct ResilientClient {
    name: String,
    inner: Arc<dyn ProviderClient<Error = ClientError>>,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    settings: ResilientSettings,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    pub fn new(
        inner: Arc<dyn ProviderClient<Error = ClientError>>,
        settings: ResilientSettings,
    ) -> Self {
        Self {
            name: inner.name().to_string(),
            limiter: TokenBucket::new(settings.rate_limit_rpm),
            breaker: CircuitBreaker::new(settings.breaker.clone()),
            inner,
            settings,
        }
    }

    async fn admit(&self) -> Result<(), ClientError> {
        match self.settings.rate_limit_mode {
            RateLimitMode::Block => self
                .limiter
                .acquire(self.settings.rate_limit_max_wait)
                .await
                .map_err(|wait| ClientError::RateLimitExceeded {
                    provider: self.name.clone(),
                    retry_after_ms: wait.as_millis() as u64,
                }),
            RateLimitMode::Fail => {
                self.limiter
                    .try_acquire()
                    .map_err(|wait| ClientError::RateLimitExceeded {
                        provider: self.name.clone(),
                        retry_after_ms: wait.as_millis() as u64,
                    })
            }
        }
    }

    async fn call_once(&self, prompt: &str, history: &[Turn]) -> Result<GeneratedTurn, ClientError> {
        let timeout = self.settings.request_timeout;
        match tokio::time::timeout(timeout, self.inner.generate(prompt, history)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                provider: self.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Read-only health snapshot; no provider call is made.
    #[must_use]
    pub fn health(&self) -> ProviderHealth {
        ProviderHealth {
            provider: self.name.clone(),
            circuit_state: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            last_failure_at: self.breaker.last_failure_at(),
            tokens_available: self.limiter.available(),
            reachable: self.breaker.state() != co_core::types::CircuitState::Open,
            latency_ms: None,
        }
    }

    /// Active health probe: one lightweight generation, accounted like
    /// any other call (no extra circuit mutation).
    pub async fn health_check(&self) -> ProviderHealth {
        let mut health = self.health();
        if self.breaker.check().is_err() {
            health.reachable = false;
            return health;
        }

        match self.call_once("Hello, this is a health check.", &[]).await {
            Ok(generated) => {
                self.breaker.record_success();
                health.reachable = true;
                health.latency_ms = Some(generated.latency_ms);
            }
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(provider = %self.name, error = %e, "Health check failed");
                health.reachable = false;
            }
        }

        health.circuit_state = self.breaker.state();
        health.consecutive_failures = self.breaker.consecutive_failures();
        health.last_failure_at = self.breaker.last_failure_at();
        health
    }
}

#[async_trait]
impl ProviderClient for ResilientClient {
    type Error = ClientError;

    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<GeneratedTurn, Self::Error> {
        self.admit().await?;

        self.breaker
            .check()
            .map_err(|remaining| ClientError::CircuitOpen {
                provider: self.name.clone(),
                remaining_ms: remaining.as_millis() as u64,
            })?;

        let result = retry_with_backoff(&self.settings.retry, |_attempt| {
            self.call_once(prompt, history)
        })
        .await;

        match result {
            Ok(generated) => {
                self.breaker.record_success();
                metrics::counter!("provider_calls_total", "provider" => self.name.clone(), "outcome" => "ok")
                    .increment(1);
                metrics::histogram!("provider_latency_ms", "provider" => self.name.clone())
                    .record(generated.latency_ms as f64);
                Ok(generated)
            }
            Err(e) => {
                // One failure per exhausted call, not per attempt.
                self.breaker.record_failure();
                metrics::counter!("provider_calls_total", "provider" => self.name.clone(), "outcome" => "error")
                    .increment(1);
                Err(e)
            }
        }
    }
}
