//! The conversation state machine.
//!
//! Drives one conversation from creation to a terminal status:
//! `Created -> Running -> (turn loop) -> Ending -> Completed`, with
//! `Failed` and `TimedOut` reachable from any non-terminal state. All
//! store writes happen under the conversation lock and carry the version
//! last read; the lock is released on every terminal path.

use co_core::traits::{ConversationStore, EventPublisher, ProviderClient};
use co_core::types::{
    CompletionReason, Conversation, ConversationEvent, ConversationStatus, Topic, Turn,
};
use clients::ClientRegistry;
use config::Config;
use errors::{ClientError, OrchestratorError, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::durable_events::DurableEventPublisher;
use crate::quality::QualityAssessor;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub min_turns: u32,
    pub max_turns: u32,
    pub timeout: Duration,
    pub ttl_seconds: u64,
    pub lock_ttl_seconds: u64,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            min_turns: config.conversation.min_turns,
            max_turns: config.conversation.max_turns,
            timeout: Duration::from_secs(config.conversation.timeout_seconds),
            ttl_seconds: config.conversation.ttl_seconds,
            lock_ttl_seconds: config.worker.lock_ttl_seconds,
        }
    }
}

/// Outcome of one orchestrated conversation, reported back to the
/// worker pool.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub conversation_id: co_core::types::ConversationId,
    pub status: ConversationStatus,
    pub turn_count: u32,
    pub quality_score: f64,
}

pub struct Orchestrator<S, P>
where
    S: ConversationStore<Error = StoreError>,
    P: EventPublisher<Error = errors::EventError>,
{
    store: Arc<S>,
    registry: Arc<ClientRegistry>,
    events: Arc<DurableEventPublisher<P>>,
    assessor: QualityAssessor,
    settings: OrchestratorSettings,
}

impl<S, P> Orchestrator<S, P>
where
    S: ConversationStore<Error = StoreError>,
    P: EventPublisher<Error = errors::EventError>,
{
    pub fn new(
        store: Arc<S>,
        registry: Arc<ClientRegistry>,
        events: Arc<DurableEventPublisher<P>>,
        assessor: QualityAssessor,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            assessor,
            settings,
        }
    }

    /// Runs one conversation to a terminal status.
    pub async fn run(&self, topic: Topic) -> Result<ConversationOutcome, OrchestratorError> {
        let mut conversation = Conversation::new(topic, self.settings.ttl_seconds);
        let id = conversation.id.clone();
        let started = Instant::now();

        self.store
            .create(&conversation)
            .await
            .map_err(|e| OrchestratorError::Store {
                id: id.to_string(),
                source: e,
            })?;

        let lock = self
            .store
            .acquire_lock(&id, self.settings.lock_ttl_seconds)
            .await
            .map_err(|e| OrchestratorError::Store {
                id: id.to_string(),
                source: e,
            })?;

        self.emit(ConversationEvent::New {
            conversation_id: id.clone(),
            topic: conversation.topic.title.clone(),
            source: conversation.topic.source.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;

        conversation.try_set_status(ConversationStatus::Running);
        if let Err(e) = self.write(&mut conversation).await {
            let _ = self.store.release_lock(&id, &lock.token).await;
            return Err(e);
        }

        tracing::info!(
            conversation_id = %id,
            topic = %conversation.topic.title,
            "Conversation started"
        );

        let result = self
            .turn_loop(&mut conversation, started, &lock.token)
            .await;

        let released = self
            .store
            .release_lock(&id, &lock.token)
            .await
            .unwrap_or(false);
        if !released {
            tracing::warn!(conversation_id = %id, "Lock was already gone at release");
        }

        result
    }

    /// The running loop: alternate providers, append turns, evaluate
    /// ending after every recorded turn and before the next.
    async fn turn_loop(
        &self,
        conversation: &mut Conversation,
        started: Instant,
        lock_token: &str,
    ) -> Result<ConversationOutcome, OrchestratorError> {
        loop {
            // Deadline check at the iteration boundary, never mid-call.
            if started.elapsed() >= self.settings.timeout {
                tracing::warn!(conversation_id = %conversation.id, "Conversation timed out");
                return self
                    .finalize(
                        conversation,
                        ConversationStatus::TimedOut,
                        CompletionReason::Timeout,
                    )
                    .await;
            }

            if conversation.turn_count() >= self.settings.max_turns {
                return self
                    .finalize(
                        conversation,
                        ConversationStatus::Completed,
                        CompletionReason::MaxTurns,
                    )
                    .await;
            }
            if conversation.turn_count() >= self.settings.min_turns
                && self.assessor.natural_end(&conversation.turns)
            {
                let reason = if self.assessor.detect_repetition(&conversation.turns) {
                    CompletionReason::Repetition
                } else {
                    CompletionReason::NaturalEnding
                };
                return self
                    .finalize(conversation, ConversationStatus::Completed, reason)
                    .await;
            }

            let renewed = self
                .store
                .renew_lock(
                    &conversation.id,
                    lock_token,
                    self.settings.lock_ttl_seconds,
                )
                .await
                .unwrap_or(false);
            if !renewed {
                // The lock expired under us; another owner may exist, so
                // no further writes are safe.
                tracing::error!(
                    conversation_id = %conversation.id,
                    "Lost conversation lock mid-loop, abandoning"
                );
                return Err(OrchestratorError::Store {
                    id: conversation.id.to_string(),
                    source: StoreError::LockContention {
                        id: conversation.id.to_string(),
                    },
                });
            }

            match self.request_turn(conversation).await {
                Ok(turn) => {
                    let sequence = turn.sequence;
                    let provider = turn.provider.clone();
                    let token_count = turn.token_count;
                    let latency_ms = turn.latency_ms;

                    if !conversation.append_turn(turn) {
                        return Err(OrchestratorError::InvalidTransition {
                            id: conversation.id.to_string(),
                            from: format!("turn {}", conversation.next_sequence()),
                            to: format!("turn {}", sequence),
                        });
                    }
                    self.write(conversation).await?;

                    let now = chrono::Utc::now().timestamp();
                    self.emit(ConversationEvent::Turn {
                        conversation_id: conversation.id.clone(),
                        sequence_index: sequence,
                        provider: provider.clone(),
                        timestamp: now,
                    })
                    .await;
                    self.emit(ConversationEvent::Response {
                        conversation_id: conversation.id.clone(),
                        sequence_index: sequence,
                        token_count,
                        latency_ms,
                        timestamp: now,
                    })
                    .await;

                    tracing::debug!(
                        conversation_id = %conversation.id,
                        sequence,
                        provider = %provider,
                        "Turn recorded"
                    );
                }
                Err(reason) => {
                    tracing::error!(
                        conversation_id = %conversation.id,
                        error = %reason,
                        "All providers failed, conversation failed"
                    );
                    self.emit(ConversationEvent::Error {
                        conversation_id: conversation.id.clone(),
                        error_kind: "provider_failure".to_string(),
                        message: reason.clone(),
                        recoverable: false,
                        timestamp: chrono::Utc::now().timestamp(),
                    })
                    .await;
                    return self
                        .finalize(
                            conversation,
                            ConversationStatus::Failed,
                            CompletionReason::Error,
                        )
                        .await;
                }
            }
        }
    }

    /// Requests the next turn, rotating to the next provider on failure.
    /// A failed generation never produces a Turn.
    async fn request_turn(&self, conversation: &Conversation) -> Result<Turn, String> {
        let names = self.registry.provider_names();
        let base = conversation.turn_count() as usize;
        let prompt = Self::prompt_for(conversation);
        let mut failures = Vec::new();

        for offset in 0..names.len() {
            let name = &names[(base + offset) % names.len()];
            let client = match self.registry.get(name) {
                Ok(client) => client,
                Err(e) => {
                    failures.push(format!("{}: {}", name, e));
                    continue;
                }
            };

            match client.generate(&prompt, &conversation.turns).await {
                Ok(generated) => {
                    return Ok(Turn {
                        sequence: conversation.next_sequence(),
                        provider: name.clone(),
                        content: generated.content,
                        token_count: generated.token_count,
                        latency_ms: generated.latency_ms,
                        timestamp: chrono::Utc::now().timestamp(),
                    });
                }
                Err(e @ ClientError::CircuitOpen { .. }) => {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        provider = %name,
                        "Circuit open, rotating to next provider"
                    );
                    failures.push(format!("{}: {}", name, e));
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        provider = %name,
                        error = %e,
                        "Provider failed, rotating to next provider"
                    );
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        Err(failures.join("; "))
    }

    fn prompt_for(conversation: &Conversation) -> String {
        if conversation.turns.is_empty() {
            format!(
                "Start a thoughtful discussion about: {}",
                conversation.topic.title
            )
        } else {
            format!(
                "Respond to the previous message about {}. Provide a thoughtful perspective \
                 that adds to the discussion.",
                conversation.topic.title
            )
        }
    }

    async fn finalize(
        &self,
        conversation: &mut Conversation,
        status: ConversationStatus,
        reason: CompletionReason,
    ) -> Result<ConversationOutcome, OrchestratorError> {
        let score = self.assessor.score(&conversation.turns);
        conversation.quality_score = Some(score);
        conversation.completion_reason = Some(reason);

        if status == ConversationStatus::Completed {
            conversation.try_set_status(ConversationStatus::Ending);
        }
        if !conversation.try_set_status(status) {
            return Err(OrchestratorError::InvalidTransition {
                id: conversation.id.to_string(),
                from: conversation.status.to_string(),
                to: status.to_string(),
            });
        }

        self.write(conversation).await?;

        self.emit(ConversationEvent::Completed {
            conversation_id: conversation.id.clone(),
            final_status: status,
            completion_reason: reason,
            turn_count: conversation.turn_count(),
            quality_score: score,
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;

        metrics::counter!("conversations_terminal_total", "status" => status.to_string())
            .increment(1);
        tracing::info!(
            conversation_id = %conversation.id,
            status = %status,
            reason = %reason,
            turns = conversation.turn_count(),
            quality_score = score,
            "Conversation reached terminal status"
        );

        Ok(ConversationOutcome {
            conversation_id: conversation.id.clone(),
            status,
            turn_count: conversation.turn_count(),
            quality_score: score,
        })
    }

    /// Versioned write; on a stale write the stored copy wins if it is
    /// terminal (the sweeper got there first), otherwise the write is
    /// retried once on top of the fresh version.
    async fn write(&self, conversation: &mut Conversation) -> Result<(), OrchestratorError> {
        let expected = conversation.version;
        match self.store.update(conversation, expected).await {
            Ok(version) => {
                conversation.version = version;
                Ok(())
            }
            Err(StoreError::StaleWrite { actual, .. }) => {
                let stored = self
                    .store
                    .get(&conversation.id)
                    .await
                    .map_err(|e| OrchestratorError::Store {
                        id: conversation.id.to_string(),
                        source: e,
                    })?;

                if let Some(stored) = stored {
                    if stored.status.is_terminal() {
                        tracing::warn!(
                            conversation_id = %conversation.id,
                            status = %stored.status,
                            "Store already terminal, dropping local write"
                        );
                        *conversation = stored;
                        return Ok(());
                    }
                }

                let version = self
                    .store
                    .update(conversation, actual)
                    .await
                    .map_err(|e| OrchestratorError::Store {
                        id: conversation.id.to_string(),
                        source: e,
                    })?;
                conversation.version = version;
                Ok(())
            }
            Err(e) => Err(OrchestratorError::Store {
                id: conversation.id.to_string(),
                source: e,
            }),
        }
    }

    /// Publishes through the durable pipeline; a failed publish is
    /// retried by the outbox job, never dropped and never fatal to the
    /// conversation.
    async fn emit(&self, event: ConversationEvent) {
        if let Err(e) = self.events.publish_durable(event).await {
            tracing::warn!(error = %e, "Event publish deferred to outbox retry");
        }
    }
}
