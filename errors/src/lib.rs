//! # Colloquy Errors
//!
//! Error taxonomy for the conversation orchestration engine.
//!
//! One enum per subsystem, using `thiserror` with named fields so callers
//! can match on structured context instead of parsing messages.

use thiserror::Error;

/// Provider client errors.
///
/// `RateLimitExceeded` and `CircuitOpen` are control-flow signals: the
/// caller backs off or rotates to another provider, and neither counts as
/// a circuit-breaker failure. `Provider` and `Timeout` are transient and
/// retried locally before they escalate.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Rate limited on {provider}: retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Circuit open for {provider}: cooling down for {remaining_ms}ms")]
    CircuitOpen { provider: String, remaining_ms: u64 },

    #[error("Provider error: {provider} - {reason}")]
    Provider { provider: String, reason: String },

    #[error("Provider call timed out: {provider} after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Unknown provider: {name}")]
    UnknownProvider { name: String },

    #[error("Invalid provider response: {provider} - {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ClientError {
    /// Transient errors are eligible for local retry with backoff.
    /// Everything else fails fast to the orchestrator.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Provider { .. } | ClientError::Timeout { .. })
    }
}

/// Conversation store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection to {backend} failed: {reason}")]
    Connection { backend: String, reason: String },

    #[error("Query on {backend} failed: {reason}")]
    Query { backend: String, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Conversation not found: {id}")]
    NotFound { id: String },

    #[error("Lock contention on conversation {id}")]
    LockContention { id: String },

    #[error("Stale write on conversation {id}: expected version {expected}, found {actual}")]
    StaleWrite {
        id: String,
        expected: u64,
        actual: u64,
    },
}

/// Event pipeline errors.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Delivery of event {event_id} failed after {attempts} attempts: {reason}")]
    DeliveryFailure {
        event_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Publish to {stream} failed: {reason}")]
    Publish { stream: String, reason: String },

    #[error("Subscribe for group {group} failed: {reason}")]
    Subscribe { group: String, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("No handler registered for event kind: {kind}")]
    UnhandledKind { kind: String },
}

/// Orchestrator-level errors. Terminal for the owning conversation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Conversation {id} exceeded its deadline of {timeout_seconds}s")]
    TimeoutExceeded { id: String, timeout_seconds: u64 },

    #[error("All providers exhausted for conversation {id}: {reason}")]
    ProvidersExhausted { id: String, reason: String },

    #[error("Store failure for conversation {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Invalid status transition for conversation {id}: {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_transience() {
        let transient = ClientError::Provider {
            provider: "anthropic".to_string(),
            reason: "502".to_string(),
        };
        let timeout = ClientError::Timeout {
            provider: "google".to_string(),
            timeout_ms: 30_000,
        };
        let circuit = ClientError::CircuitOpen {
            provider: "anthropic".to_string(),
            remaining_ms: 60_000,
        };
        let rate = ClientError::RateLimitExceeded {
            provider: "anthropic".to_string(),
            retry_after_ms: 1_000,
        };

        assert!(transient.is_transient());
        assert!(timeout.is_transient());
        assert!(!circuit.is_transient());
        assert!(!rate.is_transient());
    }

    #[test]
    fn stale_write_reports_both_versions() {
        let err = StoreError::StaleWrite {
            id: "conv-1".to_string(),
            expected: 3,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("found 5"));
    }

    #[test]
    fn delivery_failure_includes_attempts() {
        let err = EventError::DeliveryFailure {
            event_id: "evt-1".to_string(),
            attempts: 4,
            reason: "stream unavailable".to_string(),
        };
        assert!(err.to_string().contains("after 4 attempts"));
    }

    #[test]
    fn orchestrator_error_carries_store_source() {
        let err = OrchestratorError::Store {
            id: "conv-1".to_string(),
            source: StoreError::LockContention {
                id: "conv-1".to_string(),
            },
        };
        assert!(err.to_string().contains("conv-1"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
