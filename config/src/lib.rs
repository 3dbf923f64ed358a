//! # Configuration System
//!
//! Centralized configuration for the conversation orchestration engine.
//!
//! This crate provides:
//! - Configuration structures for all system components
//! - Environment variable loading (12-factor app principles)
//! - Configuration validation, including cross-field rules
//!
//! Configuration is loaded once at startup and passed by value into each
//! component constructor; there is no process-wide mutable configuration.

pub mod config;
pub mod loader;
pub mod validator;

pub use crate::config::{
    Config, ConversationConfig, EventBusConfig, ProviderSpec, ProvidersConfig, RateLimitMode,
    RedisConfig, WorkerConfig,
};
pub use crate::loader::load_from_env;
pub use crate::validator::validate;
pub use ::validator::Validate;
