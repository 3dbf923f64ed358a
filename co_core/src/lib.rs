//! # Conversation Orchestration Core
//!
//! Shared types and traits for the conversation orchestration engine.
//!
//! This crate provides:
//! - Type definitions for conversations, turns, topics and lifecycle events
//! - Core traits for stores, publishers, provider clients and topic queues
//! - Event durability types (persistent envelope, status, consumer state)

pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use traits::HealthStatus;
pub use types::{
    CircuitState, CompletionReason, Conversation, ConversationEvent, ConversationId,
    ConversationLock, ConversationStatus, ConsumerState, EventKind, EventStatus, GeneratedTurn,
    PersistentEvent, ProviderHealth, Topic, Turn,
};
