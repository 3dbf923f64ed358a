//! Background maintenance jobs.
//!
//! One scheduler owns the periodic work that runs independently of any
//! conversation's owning worker: sweeping expired conversations,
//! retrying pending outbox events, and reprocessing the dead-letter
//! queue.

use co_core::traits::{ConversationStore, EventPublisher};
use errors::StoreError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

use crate::durable_events::DurableEventPublisher;

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub sweep_interval: Duration,
    pub event_retry_interval: Duration,
    pub dlq_interval: Duration,
    pub retry_batch_size: usize,
}

impl From<&config::Config> for MaintenanceSettings {
    fn from(config: &config::Config) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.worker.sweep_interval_seconds),
            event_retry_interval: Duration::from_secs(config.events.retry_interval_seconds),
            dlq_interval: Duration::from_secs(config.events.dlq_interval_seconds),
            retry_batch_size: 100,
        }
    }
}

pub struct MaintenanceScheduler<S, P>
where
    S: ConversationStore<Error = StoreError>,
    P: EventPublisher<Error = errors::EventError>,
{
    store: Arc<S>,
    events: Arc<DurableEventPublisher<P>>,
    settings: MaintenanceSettings,
}

impl<S, P> MaintenanceScheduler<S, P>
where
    S: ConversationStore<Error = StoreError>,
    P: EventPublisher<Error = errors::EventError>,
{
    pub fn new(
        store: Arc<S>,
        events: Arc<DurableEventPublisher<P>>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            store,
            events,
            settings,
        }
    }

    /// Runs the job loop until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut sweep = time::interval(self.settings.sweep_interval);
        let mut retry = time::interval(self.settings.event_retry_interval);
        let mut dlq = time::interval(self.settings.dlq_interval);

        // The first tick of a tokio interval fires immediately.
        sweep.tick().await;
        retry.tick().await;
        dlq.tick().await;

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    self.run_sweep().await;
                }
                _ = retry.tick() => {
                    self.run_event_retry().await;
                }
                _ = dlq.tick() => {
                    self.run_dlq_report().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Maintenance scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    pub async fn run_sweep(&self) {
        match self.store.sweep_expired().await {
            Ok(swept) if swept.is_empty() => {}
            Ok(swept) => {
                tracing::info!(count = swept.len(), "Swept expired conversations");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Conversation sweep failed");
            }
        }
    }

    pub async fn run_event_retry(&self) {
        let result = self.events.retry_pending(self.settings.retry_batch_size).await;
        if result.total > 0 {
            tracing::info!(
                total = result.total,
                succeeded = result.succeeded,
                retried = result.retried,
                dead_lettered = result.dead_lettered,
                "Outbox retry pass finished"
            );
        }
    }

    async fn run_dlq_report(&self) {
        let dead = self
            .events
            .dead_letter_events(self.settings.retry_batch_size)
            .await;
        if !dead.is_empty() {
            metrics::gauge!("events_dead_letter_backlog").set(dead.len() as f64);
            tracing::warn!(backlog = dead.len(), "Dead-letter queue has entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use co_core::types::{Conversation, Topic};
    use storage::{ChannelPublisher, MemoryStore};

    #[tokio::test]
    async fn sweep_job_times_out_expired_conversations() {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(DurableEventPublisher::new(
            Arc::new(ChannelPublisher::new()),
            3,
        ));

        let mut conversation = Conversation::new(
            Topic {
                title: "t".to_string(),
                source: "s".to_string(),
                url: None,
            },
            3_600,
        );
        conversation.expires_at = chrono::Utc::now().timestamp() - 1;
        store.create(&conversation).await.unwrap();

        let scheduler = MaintenanceScheduler::new(
            store.clone(),
            events,
            MaintenanceSettings {
                sweep_interval: Duration::from_secs(60),
                event_retry_interval: Duration::from_secs(60),
                dlq_interval: Duration::from_secs(60),
                retry_batch_size: 10,
            },
        );
        scheduler.run_sweep().await;

        let loaded = store.get(&conversation.id).await.unwrap().unwrap();
        assert!(loaded.status.is_terminal());
    }
}
