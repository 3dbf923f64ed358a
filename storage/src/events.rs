//! Event pipeline publishers.
//!
//! `RedisPublisher` maps each event kind onto its own Redis stream and
//! delivers through consumer groups: every group sees every event at
//! least once, members within a group share the stream, and entries are
//! acknowledged only after the subscriber has taken delivery. Entries
//! that cannot be decoded are routed to a per-stream dead-letter stream
//! with the original payload and error, never dropped.
//!
//! `ChannelPublisher` is the in-process equivalent used by tests and
//! single-node runs.

use async_trait::async_trait;
use co_core::traits::EventPublisher;
use co_core::types::{ConversationEvent, EventKind};
use ::redis::AsyncCommands;
use errors::EventError;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

fn stream_name(prefix: &str, kind: EventKind) -> String {
    format!("{}.{}", prefix, kind.as_str())
}

fn dlq_stream_name(stream: &str) -> String {
    format!("{}.dlq", stream)
}

pub struct RedisPublisher {
    client: Arc<redis::Client>,
    stream_prefix: String,
}

impl RedisPublisher {
    pub fn new(connection_url: &str, stream_prefix: &str) -> Result<Self, EventError> {
        let client = redis::Client::open(connection_url).map_err(|e| EventError::Publish {
            stream: stream_prefix.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client: Arc::new(client),
            stream_prefix: stream_prefix.to_string(),
        })
    }

    async fn ensure_group(
        conn: &mut redis::aio::ConnectionManager,
        stream: &str,
        group: &str,
    ) -> Result<(), EventError> {
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            // The group surviving a restart is the normal case.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(EventError::Subscribe {
                group: group.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn route_to_dlq(
        conn: &mut redis::aio::ConnectionManager,
        stream: &str,
        raw: &str,
        error: &str,
    ) {
        let dlq = dlq_stream_name(stream);
        let failed_at = chrono::Utc::now().timestamp().to_string();
        let entry: Result<String, redis::RedisError> = conn
            .xadd(
                &dlq,
                "*",
                &[
                    ("original_stream", stream),
                    ("original_payload", raw),
                    ("error", error),
                    ("failed_at", failed_at.as_str()),
                ],
            )
            .await;

        match entry {
            Ok(_) => {
                metrics::counter!("events_dead_lettered_total").increment(1);
                tracing::error!(stream = stream, error = error, "Event routed to DLQ");
            }
            Err(e) => {
                tracing::error!(
                    stream = stream,
                    error = %e,
                    "Failed to route event to DLQ"
                );
            }
        }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    type Error = EventError;

    async fn publish(&self, event: ConversationEvent) -> Result<(), Self::Error> {
        let stream = stream_name(&self.stream_prefix, event.kind());
        let payload = serde_json::to_string(&event).map_err(|e| EventError::Serialization {
            reason: e.to_string(),
        })?;

        let mut conn =
            self.client
                .get_connection_manager()
                .await
                .map_err(|e| EventError::Publish {
                    stream: stream.clone(),
                    reason: e.to_string(),
                })?;

        let _: String = conn
            .xadd(&stream, "*", &[("event", payload)])
            .await
            .map_err(|e| EventError::Publish {
                stream: stream.clone(),
                reason: e.to_string(),
            })?;

        metrics::counter!("events_published_total", "kind" => event.kind().as_str())
            .increment(1);
        Ok(())
    }

    async fn subscribe(
        &self,
        group: &str,
        consumer: &str,
        kinds: &[EventKind],
    ) -> Result<mpsc::Receiver<ConversationEvent>, Self::Error> {
        let streams: Vec<String> = kinds
            .iter()
            .map(|kind| stream_name(&self.stream_prefix, *kind))
            .collect();

        let mut conn =
            self.client
                .get_connection_manager()
                .await
                .map_err(|e| EventError::Subscribe {
                    group: group.to_string(),
                    reason: e.to_string(),
                })?;

        for stream in &streams {
            Self::ensure_group(&mut conn, stream, group).await?;
        }

        let (tx, rx) = mpsc::channel(100);
        let group = group.to_string();
        let consumer = consumer.to_string();

        tokio::spawn(async move {
            let ids: Vec<&str> = streams.iter().map(|_| ">").collect();

            loop {
                let opts = redis::streams::StreamReadOptions::default()
                    .group(&group, &consumer)
                    .block(1_000)
                    .count(10);

                let reply: Result<redis::streams::StreamReadReply, redis::RedisError> =
                    conn.xread_options(&streams, &ids, &opts).await;

                match reply {
                    Ok(reply) => {
                        for stream in reply.keys {
                            for record in stream.ids {
                                let raw = record
                                    .map
                                    .get("event")
                                    .and_then(|v| {
                                        redis::from_redis_value::<String>(v.clone()).ok()
                                    })
                                    .unwrap_or_default();

                                match serde_json::from_str::<ConversationEvent>(&raw) {
                                    Ok(event) => {
                                        if tx.send(event).await.is_err() {
                                            // Subscriber gone; leave the entry
                                            // unacked for redelivery.
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        Self::route_to_dlq(
                                            &mut conn,
                                            &stream.key,
                                            &raw,
                                            &e.to_string(),
                                        )
                                        .await;
                                    }
                                }

                                let _: Result<i32, redis::RedisError> = conn
                                    .xack(&stream.key, &group, &[&record.id])
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(group = %group, error = %e, "Stream read failed");
                        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(rx)
    }
}

struct ChannelSubscriber {
    kinds: Vec<EventKind>,
    tx: mpsc::Sender<ConversationEvent>,
}

/// In-process publisher: every subscriber group sees every matching
/// event.
#[derive(Default)]
pub struct ChannelPublisher {
    subscribers: Mutex<Vec<ChannelSubscriber>>,
}

impl ChannelPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    type Error = EventError;

    async fn publish(&self, event: ConversationEvent) -> Result<(), Self::Error> {
        let mut subscribers = self.subscribers.lock().await;
        let mut open = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers.drain(..) {
            if !subscriber.kinds.contains(&event.kind()) {
                open.push(subscriber);
                continue;
            }
            match subscriber.tx.send(event.clone()).await {
                Ok(()) => open.push(subscriber),
                Err(_) => {
                    // Receiver dropped; forget the subscriber.
                }
            }
        }

        *subscribers = open;
        metrics::counter!("events_published_total", "kind" => event.kind().as_str())
            .increment(1);
        Ok(())
    }

    async fn subscribe(
        &self,
        _group: &str,
        _consumer: &str,
        kinds: &[EventKind],
    ) -> Result<mpsc::Receiver<ConversationEvent>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);
        self.subscribers.lock().await.push(ChannelSubscriber {
            kinds: kinds.to_vec(),
            tx,
        });
        Ok(rx)
    }
}
