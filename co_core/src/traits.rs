//! Core traits for the conversation orchestration engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{
    Conversation, ConversationEvent, ConversationId, ConversationLock, ConversationStatus,
    EventKind, GeneratedTurn, Topic, Turn,
};

/// Keyed, lockable, TTL-bearing conversation state store.
///
/// Concurrency contract: turn appends and status changes go through
/// `update` while holding the lock for that conversation id; snapshot
/// reads via `get` need no lock. `update` is additionally guarded by the
/// version the caller last read, so a crashed-and-recovered worker cannot
/// clobber newer state.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    type Error;

    /// Persists a new conversation at version 1 and registers it in the
    /// active index.
    async fn create(&self, conversation: &Conversation) -> Result<(), Self::Error>;

    /// Snapshot read; no lock required.
    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, Self::Error>;

    /// Optimistic write: fails with a stale-write error when the stored
    /// version differs from `expected_version`. On success the stored
    /// version becomes `expected_version + 1` and the record TTL is
    /// refreshed.
    async fn update(
        &self,
        conversation: &Conversation,
        expected_version: u64,
    ) -> Result<u64, Self::Error>;

    async fn delete(&self, id: &ConversationId) -> Result<(), Self::Error>;

    /// Ids currently registered in the active index.
    async fn list_active(&self) -> Result<Vec<ConversationId>, Self::Error>;

    /// Active conversations filtered by topic substring and/or status.
    async fn search(
        &self,
        topic_contains: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationId>, Self::Error>;

    /// Acquires the per-conversation lock, failing with a lock-contention
    /// error while any valid holder exists.
    async fn acquire_lock(
        &self,
        id: &ConversationId,
        ttl_seconds: u64,
    ) -> Result<ConversationLock, Self::Error>;

    /// Extends the TTL for the current holder only. Returns `false` when
    /// the token no longer matches (the lock expired or changed hands).
    async fn renew_lock(
        &self,
        id: &ConversationId,
        token: &str,
        ttl_seconds: u64,
    ) -> Result<bool, Self::Error>;

    /// Releases the lock when `token` matches the current holder; a stale
    /// token is a no-op returning `false`.
    async fn release_lock(&self, id: &ConversationId, token: &str) -> Result<bool, Self::Error>;

    /// Marks expired non-terminal conversations as `TimedOut` and prunes
    /// dangling index entries. Safe to run from any worker.
    async fn sweep_expired(&self) -> Result<Vec<ConversationId>, Self::Error>;
}

/// Topic-addressed, at-least-once event pipeline.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    type Error;

    async fn publish(&self, event: ConversationEvent) -> Result<(), Self::Error>;

    /// Subscribes a consumer group member to the given kinds. Each group
    /// sees every event at least once; members within a group share the
    /// stream.
    async fn subscribe(
        &self,
        group: &str,
        consumer: &str,
        kinds: &[EventKind],
    ) -> Result<tokio::sync::mpsc::Receiver<ConversationEvent>, Self::Error>;
}

/// Capability interface for one generation provider.
///
/// The registry dispatches by name, never by type inspection;
/// resilience concerns wrap implementations from the outside.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    type Error;

    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, history: &[Turn])
    -> Result<GeneratedTurn, Self::Error>;
}

/// External FIFO of discussion topics.
#[async_trait]
pub trait TopicQueue: Send + Sync {
    type Error;

    /// Pops the next topic, or `None` when the queue is empty.
    async fn pop(&self) -> Result<Option<Topic>, Self::Error>;

    async fn len(&self) -> Result<usize, Self::Error>;
}

/// Health check capability for service monitoring.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health(&self) -> HealthStatus;
}

/// Health status for service monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}
