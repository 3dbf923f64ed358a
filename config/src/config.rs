//! Configuration structures.
//!
//! All structures use `serde` for deserialization with per-field defaults
//! and `validator` for range checks. Cross-field rules (provider count,
//! turn bounds) live in [`crate::validator`].

use serde::{Deserialize, Serialize};
use ::validator::Validate;

/// Top-level configuration for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Ordered provider list; the orchestrator round-robins over it.
    #[serde(default)]
    #[validate(nested)]
    pub providers: ProvidersConfig,

    /// Conversation lifecycle tuning (turn bounds, timeout, TTL).
    #[serde(default)]
    #[validate(nested)]
    pub conversation: ConversationConfig,

    /// Event pipeline settings (streams, consumer group, DLQ cadence).
    #[serde(default)]
    #[validate(nested)]
    pub events: EventBusConfig,

    /// Worker pool sizing and lock coordination.
    #[serde(default)]
    #[validate(nested)]
    pub worker: WorkerConfig,

    /// Redis connection settings.
    #[serde(default)]
    #[validate(nested)]
    pub redis: RedisConfig,
}

/// The provider roster.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProvidersConfig {
    /// At least two providers are required for conversational diversity;
    /// enforced by [`crate::validator::validate`].
    #[serde(default = "default_provider_list")]
    #[validate(nested)]
    pub list: Vec<ProviderSpec>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            list: default_provider_list(),
        }
    }
}

fn default_provider_list() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec::named("anthropic", "claude-3-sonnet-20240229"),
        ProviderSpec::named("google", "gemini-pro"),
    ]
}

/// Per-provider connection and resilience settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProviderSpec {
    #[validate(length(min = 1, max = 64))]
    pub name: String,

    #[validate(length(min = 1, max = 128))]
    pub model: String,

    /// Name of the environment variable holding the API key. Credentials
    /// are injected opaquely; they never appear in config files.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Override for the provider endpoint; defaults are baked into each
    /// client implementation.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Token-bucket capacity, in requests per minute.
    #[serde(default = "default_rate_limit_rpm")]
    #[validate(range(min = 1, max = 10_000))]
    pub rate_limit_rpm: u32,

    /// What a call does when the bucket is empty.
    #[serde(default)]
    pub rate_limit_mode: RateLimitMode,

    /// Upper wait bound in block mode before failing with a rate-limit
    /// error.
    #[serde(default = "default_rate_limit_max_wait_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub rate_limit_max_wait_ms: u64,

    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_circuit_failure_threshold")]
    #[validate(range(min = 1, max = 100))]
    pub circuit_failure_threshold: u32,

    /// Cooldown before a half-open trial is allowed.
    #[serde(default = "default_circuit_cooldown_seconds")]
    #[validate(range(min = 1, max = 3_600))]
    pub circuit_cooldown_seconds: u64,

    /// Maximum generation attempts per call, including the first.
    #[serde(default = "default_retry_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub retry_max_delay_ms: u64,

    /// Per-call timeout for one provider request.
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 100, max = 300_000))]
    pub request_timeout_ms: u64,
}

impl ProviderSpec {
    #[must_use]
    pub fn named(name: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            api_key_env: Some(format!("{}_API_KEY", name.to_uppercase())),
            base_url: None,
            rate_limit_rpm: default_rate_limit_rpm(),
            rate_limit_mode: RateLimitMode::default(),
            rate_limit_max_wait_ms: default_rate_limit_max_wait_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown_seconds: default_circuit_cooldown_seconds(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_rate_limit_rpm() -> u32 {
    60
}

fn default_rate_limit_max_wait_ms() -> u64 {
    10_000
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_cooldown_seconds() -> u64 {
    60
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Behavior when the token bucket is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Wait for a token up to the configured bound, then fail.
    #[default]
    Block,
    /// Fail immediately.
    Fail,
}

/// Conversation lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ConversationConfig {
    #[serde(default = "default_min_turns")]
    #[validate(range(min = 1, max = 100))]
    pub min_turns: u32,

    #[serde(default = "default_max_turns")]
    #[validate(range(min = 1, max = 1_000))]
    pub max_turns: u32,

    /// Wall-clock deadline from conversation creation.
    #[serde(default = "default_timeout_seconds")]
    #[validate(range(min = 1, max = 86_400))]
    pub timeout_seconds: u64,

    /// Store TTL for conversation records.
    #[serde(default = "default_ttl_seconds")]
    #[validate(range(min = 60, max = 2_592_000))]
    pub ttl_seconds: u64,

    /// Word-overlap similarity above which recent turns count as
    /// repetition.
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f64,

    /// Inclusive turn-count band considered ideal by the quality score.
    #[serde(default = "default_ideal_turns_min")]
    pub ideal_turns_min: u32,

    #[serde(default = "default_ideal_turns_max")]
    pub ideal_turns_max: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            min_turns: default_min_turns(),
            max_turns: default_max_turns(),
            timeout_seconds: default_timeout_seconds(),
            ttl_seconds: default_ttl_seconds(),
            similarity_threshold: default_similarity_threshold(),
            ideal_turns_min: default_ideal_turns_min(),
            ideal_turns_max: default_ideal_turns_max(),
        }
    }
}

fn default_min_turns() -> u32 {
    5
}

fn default_max_turns() -> u32 {
    10
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_ttl_seconds() -> u64 {
    86_400
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_ideal_turns_min() -> u32 {
    5
}

fn default_ideal_turns_max() -> u32 {
    8
}

/// Event pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct EventBusConfig {
    /// Prefix for per-kind streams, e.g. `conversation` yields
    /// `conversation.turn`.
    #[serde(default = "default_stream_prefix")]
    #[validate(length(min = 1, max = 64))]
    pub stream_prefix: String,

    #[serde(default = "default_consumer_group")]
    #[validate(length(min = 1, max = 128))]
    pub consumer_group: String,

    #[serde(default = "default_consumer_name")]
    #[validate(length(min = 1, max = 128))]
    pub consumer_name: String,

    /// Delivery attempts before an event is dead-lettered.
    #[serde(default = "default_max_delivery_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_delivery_attempts: u32,

    /// How often the outbox retry job scans pending events.
    #[serde(default = "default_retry_interval_seconds")]
    #[validate(range(min = 1, max = 3_600))]
    pub retry_interval_seconds: u64,

    /// How often the DLQ reprocessing job runs.
    #[serde(default = "default_dlq_interval_seconds")]
    #[validate(range(min = 1, max = 86_400))]
    pub dlq_interval_seconds: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            stream_prefix: default_stream_prefix(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            max_delivery_attempts: default_max_delivery_attempts(),
            retry_interval_seconds: default_retry_interval_seconds(),
            dlq_interval_seconds: default_dlq_interval_seconds(),
        }
    }
}

fn default_stream_prefix() -> String {
    "conversation".to_string()
}

fn default_consumer_group() -> String {
    "orchestration-service".to_string()
}

fn default_consumer_name() -> String {
    "worker-0".to_string()
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_retry_interval_seconds() -> u64 {
    30
}

fn default_dlq_interval_seconds() -> u64 {
    300
}

/// Worker pool sizing and coordination.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct WorkerConfig {
    /// Upper bound on conversations in flight.
    #[serde(default = "default_max_concurrent")]
    #[validate(range(min = 1, max = 10_000))]
    pub max_concurrent_conversations: u32,

    /// Idle delay between topic-queue polls when the queue is empty or
    /// the pool is saturated.
    #[serde(default = "default_topic_poll_interval_ms")]
    #[validate(range(min = 10, max = 60_000))]
    pub topic_poll_interval_ms: u64,

    /// Per-conversation lock TTL; renewed each loop iteration.
    #[serde(default = "default_lock_ttl_seconds")]
    #[validate(range(min = 1, max = 3_600))]
    pub lock_ttl_seconds: u64,

    /// Cadence of the expired-conversation sweep job.
    #[serde(default = "default_sweep_interval_seconds")]
    #[validate(range(min = 1, max = 86_400))]
    pub sweep_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_conversations: default_max_concurrent(),
            topic_poll_interval_ms: default_topic_poll_interval_ms(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

fn default_max_concurrent() -> u32 {
    100
}

fn default_topic_poll_interval_ms() -> u64 {
    1_000
}

fn default_lock_ttl_seconds() -> u64 {
    30
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    #[serde(default = "default_redis_port")]
    #[validate(range(min = 1, max = 65_535))]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    #[validate(range(min = 0, max = 15))]
    pub db: u8,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
        }
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl RedisConfig {
    /// Connection URL for the redis crate.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.conversation.min_turns, 5);
        assert_eq!(config.conversation.max_turns, 10);
        assert_eq!(config.conversation.timeout_seconds, 300);
        assert_eq!(config.conversation.ttl_seconds, 86_400);
        assert_eq!(config.worker.max_concurrent_conversations, 100);
        assert_eq!(config.worker.lock_ttl_seconds, 30);
        assert_eq!(config.events.consumer_group, "orchestration-service");
        assert_eq!(config.providers.list.len(), 2);
    }

    #[test]
    fn provider_spec_defaults() {
        let spec = ProviderSpec::named("anthropic", "claude-3-sonnet-20240229");
        assert_eq!(spec.rate_limit_rpm, 60);
        assert_eq!(spec.circuit_failure_threshold, 5);
        assert_eq!(spec.circuit_cooldown_seconds, 60);
        assert_eq!(spec.retry_max_attempts, 3);
        assert_eq!(spec.rate_limit_mode, RateLimitMode::Block);
        assert_eq!(spec.api_key_env.as_deref(), Some("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn redis_url_formats() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://localhost:6379/0");

        redis.password = Some("secret".to_string());
        redis.db = 2;
        assert_eq!(redis.url(), "redis://:secret@localhost:6379/2");
    }

    #[test]
    fn partial_toml_style_json_fills_defaults() {
        let json = r#"{ "conversation": { "max_turns": 12 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.conversation.max_turns, 12);
        assert_eq!(config.conversation.min_turns, 5);
        assert_eq!(config.providers.list.len(), 2);
    }

    #[test]
    fn rate_limit_mode_round_trips() {
        let json = serde_json::to_string(&RateLimitMode::Fail).unwrap();
        assert_eq!(json, "\"fail\"");
        let back: RateLimitMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RateLimitMode::Fail);
    }
}
