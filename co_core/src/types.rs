//! Core types for the conversation orchestration engine.

use serde::{Deserialize, Serialize};

/// Unique conversation identifier (UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps an existing id. Returns `None` for empty or whitespace-only
    /// input.
    pub fn new(id: String) -> Option<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Generates a fresh v4 id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ConversationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| "conversation id must be non-empty".to_string())
    }
}

/// A discussion seed pulled from the external topic queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One recorded generation in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// 1-based, dense sequence index.
    pub sequence: u32,
    /// Name of the provider that generated this turn.
    pub provider: String,
    pub content: String,
    pub token_count: u32,
    pub latency_ms: u64,
    pub timestamp: i64,
}

/// Output of a single provider generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTurn {
    pub content: String,
    pub token_count: u32,
    pub latency_ms: u64,
}

/// Conversation lifecycle status.
///
/// Transitions are monotonic: once a conversation reaches `Ending` it can
/// only move to a terminal status, and terminal statuses never change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationStatus {
    Created,
    Running,
    Ending,
    Completed,
    Failed,
    TimedOut,
}

impl ConversationStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConversationStatus::Completed | ConversationStatus::Failed | ConversationStatus::TimedOut
        )
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    ///
    /// `Failed` and `TimedOut` are reachable from any non-terminal status;
    /// the happy path is Created -> Running -> Ending -> Completed.
    #[must_use]
    pub fn can_transition_to(self, to: ConversationStatus) -> bool {
        use ConversationStatus::{Completed, Created, Ending, Failed, Running, TimedOut};

        if self.is_terminal() {
            return false;
        }
        match to {
            Failed | TimedOut => true,
            Running => self == Created,
            Ending => self == Running,
            Completed => self == Ending,
            Created => false,
        }
    }
}

/// Why a conversation reached its terminal status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompletionReason {
    MaxTurns,
    NaturalEnding,
    Repetition,
    Timeout,
    Error,
}

/// A multi-turn discussion between alternating providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub topic: Topic,
    pub turns: Vec<Turn>,
    pub status: ConversationStatus,
    #[serde(default)]
    pub completion_reason: Option<CompletionReason>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Monotonically increasing, bumped by the store on every successful
    /// `update`. Callers echo the version they last read.
    pub version: u64,
    /// Unix timestamp after which the record may be swept as `TimedOut`
    /// if still non-terminal.
    pub expires_at: i64,
}

impl Conversation {
    #[must_use]
    pub fn new(topic: Topic, ttl_seconds: u64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: ConversationId::generate(),
            topic,
            turns: Vec::new(),
            status: ConversationStatus::Created,
            completion_reason: None,
            quality_score: None,
            created_at: now,
            updated_at: now,
            version: 1,
            expires_at: now + ttl_seconds as i64,
        }
    }

    /// Sequence index the next appended turn must carry.
    #[must_use]
    pub fn next_sequence(&self) -> u32 {
        self.turns.last().map_or(1, |t| t.sequence + 1)
    }

    /// Appends a turn, enforcing dense 1-based ordering. Returns `false`
    /// (and appends nothing) when the sequence index does not follow the
    /// previous one.
    pub fn append_turn(&mut self, turn: Turn) -> bool {
        if turn.sequence != self.next_sequence() {
            return false;
        }
        self.turns.push(turn);
        self.updated_at = chrono::Utc::now().timestamp();
        true
    }

    /// Applies a status transition when the lifecycle permits it.
    pub fn try_set_status(&mut self, to: ConversationStatus) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        self.status = to;
        self.updated_at = chrono::Utc::now().timestamp();
        true
    }

    #[must_use]
    pub fn turn_count(&self) -> u32 {
        self.turns.len() as u32
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.turns.iter().map(|t| u64::from(t.token_count)).sum()
    }

    /// Distinct provider names, in order of first appearance.
    #[must_use]
    pub fn providers_used(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for turn in &self.turns {
            if !seen.contains(&turn.provider) {
                seen.push(turn.provider.clone());
            }
        }
        seen
    }

    #[must_use]
    pub fn duration_seconds(&self) -> i64 {
        match (self.turns.first(), self.turns.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }
}

/// Circuit breaker state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only health snapshot for one provider client.
///
/// Mutated only by the owning client; observers get copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: String,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_failure_at: Option<i64>,
    /// Current token-bucket level, in whole and fractional requests.
    pub tokens_available: f64,
    pub reachable: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

/// Result of a successful lock acquisition.
#[derive(Debug, Clone)]
pub struct ConversationLock {
    pub conversation_id: ConversationId,
    /// Unique token identifying this holder. Renew and release are no-ops
    /// for any other token.
    pub token: String,
    pub ttl_seconds: u64,
}

/// Lifecycle event kind, one per routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    New,
    Turn,
    Response,
    Completed,
    Error,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::New => "new",
            EventKind::Turn => "turn",
            EventKind::Response => "response",
            EventKind::Completed => "completed",
            EventKind::Error => "error",
        }
    }

    #[must_use]
    pub fn routing_key(self) -> &'static str {
        match self {
            EventKind::New => "conversation.new",
            EventKind::Turn => "conversation.turn",
            EventKind::Response => "conversation.response",
            EventKind::Completed => "conversation.completed",
            EventKind::Error => "conversation.error",
        }
    }

    /// Every kind the pipeline can emit. Used to validate handler maps at
    /// startup.
    #[must_use]
    pub fn all() -> [EventKind; 5] {
        [
            EventKind::New,
            EventKind::Turn,
            EventKind::Response,
            EventKind::Completed,
            EventKind::Error,
        ]
    }
}

/// Conversation lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// A conversation was created from a topic.
    New {
        conversation_id: ConversationId,
        topic: String,
        source: String,
        timestamp: i64,
    },

    /// A turn was requested from a provider.
    Turn {
        conversation_id: ConversationId,
        sequence_index: u32,
        provider: String,
        timestamp: i64,
    },

    /// A provider produced a turn that was recorded.
    Response {
        conversation_id: ConversationId,
        sequence_index: u32,
        token_count: u32,
        latency_ms: u64,
        timestamp: i64,
    },

    /// A conversation reached a terminal status.
    Completed {
        conversation_id: ConversationId,
        final_status: ConversationStatus,
        completion_reason: CompletionReason,
        turn_count: u32,
        quality_score: f64,
        timestamp: i64,
    },

    /// A processing error, recoverable or not.
    Error {
        conversation_id: ConversationId,
        error_kind: String,
        message: String,
        recoverable: bool,
        timestamp: i64,
    },
}

impl ConversationEvent {
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            ConversationEvent::New { conversation_id, .. }
            | ConversationEvent::Turn { conversation_id, .. }
            | ConversationEvent::Response { conversation_id, .. }
            | ConversationEvent::Completed { conversation_id, .. }
            | ConversationEvent::Error { conversation_id, .. } => conversation_id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ConversationEvent::New { .. } => EventKind::New,
            ConversationEvent::Turn { .. } => EventKind::Turn,
            ConversationEvent::Response { .. } => EventKind::Response,
            ConversationEvent::Completed { .. } => EventKind::Completed,
            ConversationEvent::Error { .. } => EventKind::Error,
        }
    }

    #[must_use]
    pub fn routing_key(&self) -> &'static str {
        self.kind().routing_key()
    }
}

/// Delivery status of a persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Published,
    DeadLettered,
}

/// Durable envelope around a [`ConversationEvent`].
///
/// Persisted before the first publish attempt so a crashed publisher can
/// be replayed; moves to `DeadLettered` once `attempts` reaches
/// `max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentEvent {
    pub event_id: String,
    /// Stable key consumers use for deduplication: kind + conversation +
    /// payload discriminant.
    pub idempotency_key: String,
    pub payload: ConversationEvent,
    pub status: EventStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl PersistentEvent {
    #[must_use]
    pub fn new(payload: ConversationEvent, max_attempts: u32) -> Self {
        let event_id = uuid::Uuid::new_v4().to_string();
        let idempotency_key = match &payload {
            ConversationEvent::Turn { sequence_index, .. }
            | ConversationEvent::Response { sequence_index, .. } => format!(
                "{}:{}:{}",
                payload.kind().as_str(),
                payload.conversation_id(),
                sequence_index
            ),
            _ => format!("{}:{}", payload.kind().as_str(), payload.conversation_id()),
        };
        Self {
            event_id,
            idempotency_key,
            payload,
            status: EventStatus::Pending,
            attempts: 0,
            max_attempts,
            last_error: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.status == EventStatus::Pending && self.attempts < self.max_attempts
    }

    /// Records a failed delivery attempt. Returns whether another attempt
    /// is allowed; when not, the event has moved to `DeadLettered`.
    pub fn mark_failed(&mut self, error: String) -> bool {
        self.attempts += 1;
        self.last_error = Some(error);
        if self.attempts >= self.max_attempts {
            self.status = EventStatus::DeadLettered;
            false
        } else {
            true
        }
    }
}

/// Record of a consumer group having processed an idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerState {
    pub consumer_group: String,
    pub idempotency_key: String,
    pub processed_at: i64,
}

impl ConsumerState {
    #[must_use]
    pub fn new(consumer_group: String, idempotency_key: String) -> Self {
        Self {
            consumer_group,
            idempotency_key,
            processed_at: chrono::Utc::now().timestamp(),
        }
    }
}
