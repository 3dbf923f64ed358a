//! # Storage Layer
//!
//! Conversation store backends (Redis, in-memory), event pipeline
//! publishers, and topic queue implementations.

pub mod events;
pub mod memory;
pub mod redis;

pub use crate::events::{ChannelPublisher, RedisPublisher};
pub use crate::memory::{MemoryStore, MemoryTopicQueue};
pub use crate::redis::{RedisStore, RedisTopicQueue};
