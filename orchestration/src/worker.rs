//! Bounded-concurrency worker pool.
//!
//! Pulls topics from the external queue one at a time, runs each
//! conversation as its own task, and reports terminal outcomes back
//! over a channel. A concurrency permit is taken before the pull, so a
//! saturated pool pauses pulling instead of queueing unboundedly; an
//! empty queue just idles the pool.

use co_core::traits::{ConversationStore, EventPublisher, TopicQueue};
use errors::StoreError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};

use crate::orchestrator::{ConversationOutcome, Orchestrator};

#[derive(Debug, Clone)]
pub struct WorkerPoolSettings {
    pub max_concurrent_conversations: u32,
    pub topic_poll_interval: Duration,
}

impl From<&config::WorkerConfig> for WorkerPoolSettings {
    fn from(config: &config::WorkerConfig) -> Self {
        Self {
            max_concurrent_conversations: config.max_concurrent_conversations,
            topic_poll_interval: Duration::from_millis(config.topic_poll_interval_ms),
        }
    }
}

pub struct WorkerPool<S, P, Q>
where
    S: ConversationStore<Error = StoreError> + Send + Sync + 'static,
    P: EventPublisher<Error = errors::EventError> + Send + Sync + 'static,
    Q: TopicQueue<Error = StoreError> + Send + Sync + 'static,
{
    orchestrator: Arc<Orchestrator<S, P>>,
    topics: Arc<Q>,
    semaphore: Arc<Semaphore>,
    settings: WorkerPoolSettings,
    outcomes: mpsc::UnboundedSender<ConversationOutcome>,
}

impl<S, P, Q> WorkerPool<S, P, Q>
where
    S: ConversationStore<Error = StoreError> + Send + Sync + 'static,
    P: EventPublisher<Error = errors::EventError> + Send + Sync + 'static,
    Q: TopicQueue<Error = StoreError> + Send + Sync + 'static,
{
    /// Returns the pool and the receiver of terminal outcomes.
    pub fn new(
        orchestrator: Arc<Orchestrator<S, P>>,
        topics: Arc<Q>,
        settings: WorkerPoolSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ConversationOutcome>) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let pool = Self {
            orchestrator,
            topics,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_conversations as usize)),
            settings,
            outcomes,
        };
        (pool, receiver)
    }

    /// Runs until `shutdown` flips to true, then drains in-flight
    /// conversations.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            // Backpressure: hold a slot before pulling a topic.
            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.expect("worker semaphore never closes")
                }
                _ = shutdown.changed() => continue,
            };

            match self.topics.pop().await {
                Ok(Some(topic)) => {
                    tracing::info!(topic = %topic.title, "Topic pulled, starting conversation");
                    let orchestrator = self.orchestrator.clone();
                    let outcomes = self.outcomes.clone();

                    tokio::spawn(async move {
                        match orchestrator.run(topic).await {
                            Ok(outcome) => {
                                let _ = outcomes.send(outcome);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Conversation run failed");
                            }
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if let Ok(len) = self.topics.len().await {
                        tracing::debug!(queue_len = len, "Topic queue empty, idling");
                    }
                    tokio::select! {
                        () = tokio::time::sleep(self.settings.topic_poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Topic queue poll failed");
                    tokio::time::sleep(self.settings.topic_poll_interval).await;
                }
            }
        }

        // Drain: wait for every slot to come back.
        let _ = self
            .semaphore
            .acquire_many(self.settings.max_concurrent_conversations)
            .await;
        tracing::info!("Worker pool drained");
    }

    /// Conversations currently in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.settings.max_concurrent_conversations as usize - self.semaphore.available_permits()
    }
}
