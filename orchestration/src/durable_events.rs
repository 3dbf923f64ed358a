//! Durable event publishing: outbox, bounded retry, dead-letter path.
//!
//! Every event is recorded in the outbox before the first publish
//! attempt. A failed publish leaves the envelope `Pending` for the
//! retry job; envelopes that exhaust their attempts move to
//! `DeadLettered`, where they wait for inspection or reprocessing
//! instead of being silently lost.

use co_core::traits::EventPublisher;
use co_core::types::{ConsumerState, ConversationEvent, EventStatus, PersistentEvent};
use errors::EventError;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct DurableEventPublisher<P>
where
    P: EventPublisher<Error = EventError>,
{
    publisher: Arc<P>,
    outbox: Mutex<Vec<PersistentEvent>>,
    max_attempts: u32,
}

impl<P> DurableEventPublisher<P>
where
    P: EventPublisher<Error = EventError>,
{
    pub fn new(publisher: Arc<P>, max_attempts: u32) -> Self {
        Self {
            publisher,
            outbox: Mutex::new(Vec::new()),
            max_attempts,
        }
    }

    /// Records the event, then attempts delivery. Returns the
    /// idempotency key on success; on failure the envelope stays in the
    /// outbox for the retry job.
    pub async fn publish_durable(&self, event: ConversationEvent) -> Result<String, EventError> {
        let persistent = PersistentEvent::new(event.clone(), self.max_attempts);
        let event_id = persistent.event_id.clone();
        let idempotency_key = persistent.idempotency_key.clone();

        self.outbox.lock().await.push(persistent);

        match self.publisher.publish(event).await {
            Ok(()) => {
                self.outbox
                    .lock()
                    .await
                    .retain(|pending| pending.event_id != event_id);
                Ok(idempotency_key)
            }
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    error = %e,
                    "Publish failed, event persisted for retry"
                );
                let mut outbox = self.outbox.lock().await;
                if let Some(pending) = outbox.iter_mut().find(|p| p.event_id == event_id) {
                    pending.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Retries up to `limit` pending envelopes. Envelopes that exhaust
    /// their attempts move to the dead-letter state.
    pub async fn retry_pending(&self, limit: usize) -> RetryResult {
        let mut result = RetryResult::default();
        let pending: Vec<PersistentEvent> = {
            let outbox = self.outbox.lock().await;
            outbox
                .iter()
                .filter(|p| p.is_retriable())
                .take(limit)
                .cloned()
                .collect()
        };
        result.total = pending.len();

        for event in pending {
            match self.publisher.publish(event.payload.clone()).await {
                Ok(()) => {
                    self.outbox
                        .lock()
                        .await
                        .retain(|p| p.event_id != event.event_id);
                    result.succeeded += 1;
                }
                Err(e) => {
                    let mut outbox = self.outbox.lock().await;
                    if let Some(pending) = outbox.iter_mut().find(|p| p.event_id == event.event_id)
                    {
                        if pending.mark_failed(e.to_string()) {
                            result.retried += 1;
                        } else {
                            result.dead_lettered += 1;
                            metrics::counter!("events_dead_lettered_total").increment(1);
                            error!(
                                event_id = %event.event_id,
                                attempts = pending.attempts,
                                "Event moved to dead letter queue after max retries"
                            );
                        }
                    }
                }
            }
        }

        result
    }

    /// Dead-lettered envelopes, oldest first.
    pub async fn dead_letter_events(&self, limit: usize) -> Vec<PersistentEvent> {
        self.outbox
            .lock()
            .await
            .iter()
            .filter(|p| p.status == EventStatus::DeadLettered)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Reprocesses dead-lettered envelopes the handler approves.
    pub async fn process_dead_letters(
        &self,
        limit: usize,
        handler: impl Fn(&PersistentEvent) -> bool,
    ) -> DlqResult {
        let mut result = DlqResult::default();
        let dead_letters = self.dead_letter_events(limit).await;
        result.total = dead_letters.len();

        for event in dead_letters {
            if handler(&event) {
                match self.publisher.publish(event.payload.clone()).await {
                    Ok(()) => {
                        self.outbox
                            .lock()
                            .await
                            .retain(|p| p.event_id != event.event_id);
                        result.reprocessed += 1;
                        info!(event_id = %event.event_id, "Dead-lettered event reprocessed");
                    }
                    Err(e) => {
                        warn!(
                            event_id = %event.event_id,
                            error = %e,
                            "DLQ reprocessing failed"
                        );
                        result.failed += 1;
                    }
                }
            } else {
                result.skipped += 1;
            }
        }

        result
    }

    pub async fn pending_count(&self) -> usize {
        self.outbox
            .lock()
            .await
            .iter()
            .filter(|p| p.status == EventStatus::Pending)
            .count()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetryResult {
    pub total: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DlqResult {
    pub total: usize,
    pub reprocessed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Consumer-side deduplication over idempotency keys.
pub struct IdempotentConsumer {
    consumer_group: String,
    seen: Mutex<HashSet<String>>,
    states: Mutex<Vec<ConsumerState>>,
}

impl IdempotentConsumer {
    #[must_use]
    pub fn new(consumer_group: String) -> Self {
        Self {
            consumer_group,
            seen: Mutex::new(HashSet::new()),
            states: Mutex::new(Vec::new()),
        }
    }

    /// Runs `handler` only when `idempotency_key` has not been processed
    /// by this consumer group; replays resolve to `None`.
    pub async fn process_if_new<F, T, E>(
        &self,
        idempotency_key: &str,
        handler: F,
    ) -> Result<Option<T>, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if self.seen.lock().await.contains(idempotency_key) {
            return Ok(None);
        }

        let result = handler.await?;

        self.seen.lock().await.insert(idempotency_key.to_string());
        self.states.lock().await.push(ConsumerState::new(
            self.consumer_group.clone(),
            idempotency_key.to_string(),
        ));

        Ok(Some(result))
    }

    pub async fn processed_count(&self) -> usize {
        self.seen.lock().await.len()
    }
}
