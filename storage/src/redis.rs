//! Redis-backed conversation store and topic queue.
//!
//! Key schema:
//! - `conversation:{id}`: serialized conversation, TTL-bound
//! - `conversation:{id}:version`: optimistic concurrency counter
//! - `lock:conversation:{id}`: holder token, TTL-bound
//! - `conversations:active`: set of known conversation ids
//! - `topic_queue`: FIFO list of serialized topics
//!
//! Lock release and renewal are Lua compare-and-delete /
//! compare-and-expire scripts so a stale worker can never release or
//! extend another holder's lock. The versioned update is the same
//! technique extended to the version counter.

use async_trait::async_trait;
use co_core::traits::{ConversationStore, HealthCheck, HealthStatus, TopicQueue};
use co_core::types::{
    CompletionReason, Conversation, ConversationId, ConversationLock, ConversationStatus, Topic,
};
use ::redis::AsyncCommands;
use errors::StoreError;
use std::sync::Arc;

const ACTIVE_SET_KEY: &str = "conversations:active";
const TOPIC_QUEUE_KEY: &str = "topic_queue";

fn conversation_key(id: &ConversationId) -> String {
    format!("conversation:{}", id)
}

fn version_key(id: &ConversationId) -> String {
    format!("conversation:{}:version", id)
}

fn lock_key(id: &ConversationId) -> String {
    format!("lock:conversation:{}", id)
}

fn query_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Query {
        backend: "Redis".to_string(),
        reason: e.to_string(),
    }
}

fn serialization_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization {
        reason: e.to_string(),
    }
}

pub struct RedisStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn new(connection_url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(connection_url).map_err(|e| StoreError::Connection {
                backend: "Redis".to_string(),
                reason: e.to_string(),
            })?;

        let connection_manager =
            client
                .get_connection_manager()
                .await
                .map_err(|e| StoreError::Connection {
                    backend: "Redis".to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self { connection_manager })
    }

    /// Remaining record lifetime in seconds; at least one so a record
    /// created right at its deadline is still visible to the sweeper.
    fn remaining_ttl(conversation: &Conversation) -> u64 {
        let now = chrono::Utc::now().timestamp();
        (conversation.expires_at - now).max(1) as u64
    }
}

#[async_trait]
impl ConversationStore for RedisStore {
    type Error = StoreError;

    async fn create(&self, conversation: &Conversation) -> Result<(), Self::Error> {
        let mut conn = self.connection_manager.clone();
        let payload = serde_json::to_string(conversation).map_err(serialization_error)?;
        let ttl = Self::remaining_ttl(conversation);

        let created: Option<String> = redis::cmd("SET")
            .arg(conversation_key(&conversation.id))
            .arg(&payload)
            .arg("NX")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await
            .map_err(query_error)?;

        if created.is_none() {
            return Err(StoreError::Query {
                backend: "Redis".to_string(),
                reason: format!("conversation {} already exists", conversation.id),
            });
        }

        let _: () = conn
            .set_ex(version_key(&conversation.id), conversation.version, ttl)
            .await
            .map_err(query_error)?;
        let _: () = conn
            .sadd(ACTIVE_SET_KEY, conversation.id.as_str())
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, Self::Error> {
        let mut conn = self.connection_manager.clone();
        let payload: Option<String> = conn
            .get(conversation_key(id))
            .await
            .map_err(query_error)?;
        match payload {
            Some(json) => {
                let conversation = serde_json::from_str(&json).map_err(serialization_error)?;
                Ok(Some(conversation))
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        conversation: &Conversation,
        expected_version: u64,
    ) -> Result<u64, Self::Error> {
        let mut updated = conversation.clone();
        updated.version = expected_version + 1;
        let payload = serde_json::to_string(&updated).map_err(serialization_error)?;
        let ttl = Self::remaining_ttl(&updated);

        // -1: record gone, 0: written, >0: version conflict (actual).
        let script = redis::Script::new(
            r#"
            local current = redis.call("GET", KEYS[2])
            if current == false then
                return -1
            end
            if tonumber(current) ~= tonumber(ARGV[2]) then
                return tonumber(current)
            end
            redis.call("SET", KEYS[1], ARGV[1], "EX", tonumber(ARGV[3]))
            redis.call("SET", KEYS[2], tostring(tonumber(current) + 1), "EX", tonumber(ARGV[3]))
            return 0
            "#,
        );

        let mut conn = self.connection_manager.clone();
        let outcome: i64 = script
            .key(conversation_key(&conversation.id))
            .key(version_key(&conversation.id))
            .arg(&payload)
            .arg(expected_version)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await
            .map_err(query_error)?;

        match outcome {
            0 => Ok(expected_version + 1),
            -1 => Err(StoreError::NotFound {
                id: conversation.id.to_string(),
            }),
            actual => {
                metrics::counter!("store_stale_writes_total").increment(1);
                Err(StoreError::StaleWrite {
                    id: conversation.id.to_string(),
                    expected: expected_version,
                    actual: actual as u64,
                })
            }
        }
    }

    async fn delete(&self, id: &ConversationId) -> Result<(), Self::Error> {
        let mut conn = self.connection_manager.clone();
        let _: () = conn
            .del(&[conversation_key(id), version_key(id)])
            .await
            .map_err(query_error)?;
        let _: () = conn
            .srem(ACTIVE_SET_KEY, id.as_str())
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ConversationId>, Self::Error> {
        let mut conn = self.connection_manager.clone();
        let members: Vec<String> = conn.smembers(ACTIVE_SET_KEY).await.map_err(query_error)?;
        Ok(members
            .into_iter()
            .filter_map(ConversationId::new)
            .collect())
    }

    async fn search(
        &self,
        topic_contains: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationId>, Self::Error> {
        let needle = topic_contains.map(str::to_lowercase);
        let mut matches = Vec::new();

        for id in self.list_active().await? {
            let Some(conversation) = self.get(&id).await? else {
                continue;
            };
            if let Some(needle) = &needle {
                if !conversation.topic.title.to_lowercase().contains(needle) {
                    continue;
                }
            }
            if let Some(status) = status {
                if conversation.status != status {
                    continue;
                }
            }
            matches.push(id);
        }
        Ok(matches)
    }

    async fn acquire_lock(
        &self,
        id: &ConversationId,
        ttl_seconds: u64,
    ) -> Result<ConversationLock, Self::Error> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.connection_manager.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(lock_key(id))
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(query_error)?;

        match acquired {
            Some(_) => Ok(ConversationLock {
                conversation_id: id.clone(),
                token,
                ttl_seconds,
            }),
            None => {
                metrics::counter!("store_lock_contention_total").increment(1);
                Err(StoreError::LockContention { id: id.to_string() })
            }
        }
    }

    async fn renew_lock(
        &self,
        id: &ConversationId,
        token: &str,
        ttl_seconds: u64,
    ) -> Result<bool, Self::Error> {
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("EXPIRE", KEYS[1], ARGV[2])
            else
                return 0
            end
            "#,
        );

        let mut conn = self.connection_manager.clone();
        let result: i32 = script
            .key(lock_key(id))
            .arg(token)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(query_error)?;
        Ok(result == 1)
    }

    async fn release_lock(&self, id: &ConversationId, token: &str) -> Result<bool, Self::Error> {
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
            "#,
        );

        let mut conn = self.connection_manager.clone();
        let result: i32 = script
            .key(lock_key(id))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(query_error)?;
        Ok(result == 1)
    }

    async fn sweep_expired(&self) -> Result<Vec<ConversationId>, Self::Error> {
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.connection_manager.clone();
        let mut swept = Vec::new();

        for id in self.list_active().await? {
            let Some(mut conversation) = self.get(&id).await? else {
                // Record expired out from under the index.
                let _: () = conn
                    .srem(ACTIVE_SET_KEY, id.as_str())
                    .await
                    .map_err(query_error)?;
                swept.push(id);
                continue;
            };

            if !conversation.status.is_terminal() && conversation.expires_at <= now {
                let expected = conversation.version;
                conversation.try_set_status(ConversationStatus::TimedOut);
                conversation.completion_reason = Some(CompletionReason::Timeout);
                match self.update(&conversation, expected).await {
                    Ok(_) => {
                        tracing::warn!(
                            conversation_id = %id,
                            "Conversation expired, marked timed_out"
                        );
                        swept.push(id);
                    }
                    Err(StoreError::StaleWrite { .. }) => {
                        // The owning worker got there first; leave it be.
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !swept.is_empty() {
            metrics::counter!("store_swept_conversations_total").increment(swept.len() as u64);
        }
        Ok(swept)
    }
}

#[async_trait]
impl HealthCheck for RedisStore {
    async fn health(&self) -> HealthStatus {
        let mut conn = self.connection_manager.clone();
        let pong: Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        }
    }
}

/// FIFO topic queue over a Redis list, shared with the external topic
/// sourcing service.
pub struct RedisTopicQueue {
    connection_manager: redis::aio::ConnectionManager,
    queue_key: String,
}

impl RedisTopicQueue {
    pub async fn new(connection_url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(connection_url).map_err(|e| StoreError::Connection {
                backend: "Redis".to_string(),
                reason: e.to_string(),
            })?;
        let connection_manager =
            client
                .get_connection_manager()
                .await
                .map_err(|e| StoreError::Connection {
                    backend: "Redis".to_string(),
                    reason: e.to_string(),
                })?;
        Ok(Self {
            connection_manager,
            queue_key: TOPIC_QUEUE_KEY.to_string(),
        })
    }

    #[must_use]
    pub fn shared(connection_manager: redis::aio::ConnectionManager) -> Self {
        Self {
            connection_manager,
            queue_key: TOPIC_QUEUE_KEY.to_string(),
        }
    }
}

#[async_trait]
impl TopicQueue for RedisTopicQueue {
    type Error = StoreError;

    async fn pop(&self) -> Result<Option<Topic>, Self::Error> {
        let mut conn = self.connection_manager.clone();
        let raw: Option<String> = conn
            .lpop(&self.queue_key, None)
            .await
            .map_err(query_error)?;
        match raw {
            Some(json) => {
                let topic = serde_json::from_str(&json).map_err(serialization_error)?;
                Ok(Some(topic))
            }
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize, Self::Error> {
        let mut conn = self.connection_manager.clone();
        let len: usize = conn.llen(&self.queue_key).await.map_err(query_error)?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_schema_formats() {
        let id = ConversationId::new("conv-1".to_string()).unwrap();
        assert_eq!(conversation_key(&id), "conversation:conv-1");
        assert_eq!(version_key(&id), "conversation:conv-1:version");
        assert_eq!(lock_key(&id), "lock:conversation:conv-1");
    }

    #[test]
    fn remaining_ttl_floors_at_one_second() {
        let mut conversation = Conversation::new(
            Topic {
                title: "t".to_string(),
                source: "s".to_string(),
                url: None,
            },
            3_600,
        );
        assert!(RedisStore::remaining_ttl(&conversation) > 3_500);

        conversation.expires_at = chrono::Utc::now().timestamp() - 100;
        assert_eq!(RedisStore::remaining_ttl(&conversation), 1);
    }

    #[tokio::test]
    async fn invalid_url_is_a_connection_error() {
        let result = RedisStore::new("not-a-valid-url").await;
        match result {
            Err(StoreError::Connection { backend, .. }) => assert_eq!(backend, "Redis"),
            _ => panic!("expected ConnectionError for invalid URL"),
        }
    }
}
