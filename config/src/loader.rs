//! # Environment Variable Loader
//!
//! Loads configuration overrides from environment variables following
//! 12-factor app principles.
//!
//! # Naming Convention
//! - `COLLOQUY_*`: conversation/worker/event settings
//! - `RD_*`: Redis settings
//!
//! Environment variables override struct defaults; a config file (parsed
//! by the caller into [`Config`]) sits between the two.

use crate::config::Config;
use std::env;

/// Load configuration from environment variables on top of defaults.
///
/// ## Environment Variables
/// - `COLLOQUY_MIN_TURNS` / `COLLOQUY_MAX_TURNS`: turn bounds
/// - `COLLOQUY_CONVERSATION_TIMEOUT_SECONDS`: wall-clock deadline
/// - `COLLOQUY_CONVERSATION_TTL_SECONDS`: store TTL
/// - `COLLOQUY_SIMILARITY_THRESHOLD`: repetition threshold (0, 1]
/// - `COLLOQUY_MAX_CONCURRENT_CONVERSATIONS`: worker pool bound
/// - `COLLOQUY_LOCK_TTL_SECONDS`: conversation lock TTL
/// - `COLLOQUY_CONSUMER_GROUP` / `COLLOQUY_CONSUMER_NAME`: bus identity
/// - `COLLOQUY_STREAM_PREFIX`: event stream prefix
/// - `RD_HOST`, `RD_PORT`, `RD_PASSWORD`, `RD_DB`: Redis connection
pub fn load_from_env() -> anyhow::Result<Config> {
    let mut config = Config::default();
    apply_env(&mut config)?;
    Ok(config)
}

/// Applies environment overrides to an already-loaded configuration.
pub fn apply_env(config: &mut Config) -> anyhow::Result<()> {
    if let Some(value) = parse_var::<u32>("COLLOQUY_MIN_TURNS")? {
        config.conversation.min_turns = value;
    }
    if let Some(value) = parse_var::<u32>("COLLOQUY_MAX_TURNS")? {
        config.conversation.max_turns = value;
    }
    if let Some(value) = parse_var::<u64>("COLLOQUY_CONVERSATION_TIMEOUT_SECONDS")? {
        config.conversation.timeout_seconds = value;
    }
    if let Some(value) = parse_var::<u64>("COLLOQUY_CONVERSATION_TTL_SECONDS")? {
        config.conversation.ttl_seconds = value;
    }
    if let Some(value) = parse_var::<f64>("COLLOQUY_SIMILARITY_THRESHOLD")? {
        config.conversation.similarity_threshold = value;
    }
    if let Some(value) = parse_var::<u32>("COLLOQUY_MAX_CONCURRENT_CONVERSATIONS")? {
        config.worker.max_concurrent_conversations = value;
    }
    if let Some(value) = parse_var::<u64>("COLLOQUY_LOCK_TTL_SECONDS")? {
        config.worker.lock_ttl_seconds = value;
    }
    if let Ok(value) = env::var("COLLOQUY_CONSUMER_GROUP") {
        config.events.consumer_group = value;
    }
    if let Ok(value) = env::var("COLLOQUY_CONSUMER_NAME") {
        config.events.consumer_name = value;
    }
    if let Ok(value) = env::var("COLLOQUY_STREAM_PREFIX") {
        config.events.stream_prefix = value;
    }

    if let Ok(value) = env::var("RD_HOST") {
        config.redis.host = value;
    }
    if let Some(value) = parse_var::<u16>("RD_PORT")? {
        config.redis.port = value;
    }
    if let Ok(value) = env::var("RD_PASSWORD") {
        config.redis.password = Some(value);
    }
    if let Some(value) = parse_var::<u8>("RD_DB")? {
        config.redis.db = value;
    }

    Ok(())
}

fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => {
            let parsed = raw
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", name, e))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}
