//! In-process conversation store and topic queue.
//!
//! Implements the same contract as the Redis backend (token locks,
//! versioned optimistic writes, TTL sweeping) for unit tests and
//! single-node runs. Lock expiry uses wall-clock timestamps so an expired
//! holder loses the lock without any background task.

use async_trait::async_trait;
use co_core::traits::{ConversationStore, HealthCheck, HealthStatus, TopicQueue};
use co_core::types::{
    CompletionReason, Conversation, ConversationId, ConversationLock, ConversationStatus, Topic,
};
use dashmap::DashMap;
use errors::StoreError;
use parking_lot::Mutex;
use std::collections::VecDeque;

struct LockEntry {
    token: String,
    expires_at: i64,
}

impl LockEntry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// DashMap-backed [`ConversationStore`].
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<ConversationId, Conversation>,
    locks: DashMap<ConversationId, LockEntry>,
    active: DashMap<ConversationId, ()>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    type Error = StoreError;

    async fn create(&self, conversation: &Conversation) -> Result<(), Self::Error> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(conversation.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Query {
                backend: "Memory".to_string(),
                reason: format!("conversation {} already exists", conversation.id),
            }),
            Entry::Vacant(slot) => {
                slot.insert(conversation.clone());
                self.active.insert(conversation.id.clone(), ());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, Self::Error> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn update(
        &self,
        conversation: &Conversation,
        expected_version: u64,
    ) -> Result<u64, Self::Error> {
        let mut record = self
            .records
            .get_mut(&conversation.id)
            .ok_or_else(|| StoreError::NotFound {
                id: conversation.id.to_string(),
            })?;

        if record.version != expected_version {
            metrics::counter!("store_stale_writes_total").increment(1);
            return Err(StoreError::StaleWrite {
                id: conversation.id.to_string(),
                expected: expected_version,
                actual: record.version,
            });
        }

        let mut updated = conversation.clone();
        updated.version = expected_version + 1;
        *record = updated;
        Ok(expected_version + 1)
    }

    async fn delete(&self, id: &ConversationId) -> Result<(), Self::Error> {
        self.records.remove(id);
        self.active.remove(id);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ConversationId>, Self::Error> {
        Ok(self.active.iter().map(|e| e.key().clone()).collect())
    }

    async fn search(
        &self,
        topic_contains: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationId>, Self::Error> {
        let needle = topic_contains.map(str::to_lowercase);
        let mut matches = Vec::new();
        for entry in &self.active {
            let Some(record) = self.records.get(entry.key()) else {
                continue;
            };
            if let Some(needle) = &needle {
                if !record.topic.title.to_lowercase().contains(needle) {
                    continue;
                }
            }
            if let Some(status) = status {
                if record.status != status {
                    continue;
                }
            }
            matches.push(entry.key().clone());
        }
        Ok(matches)
    }

    async fn acquire_lock(
        &self,
        id: &ConversationId,
        ttl_seconds: u64,
    ) -> Result<ConversationLock, Self::Error> {
        use dashmap::mapref::entry::Entry;

        let now = Self::now();
        let token = uuid::Uuid::new_v4().to_string();

        match self.locks.entry(id.clone()) {
            Entry::Occupied(mut held) => {
                if held.get().is_expired(now) {
                    held.insert(LockEntry {
                        token: token.clone(),
                        expires_at: now + ttl_seconds as i64,
                    });
                } else {
                    metrics::counter!("store_lock_contention_total").increment(1);
                    return Err(StoreError::LockContention { id: id.to_string() });
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(LockEntry {
                    token: token.clone(),
                    expires_at: now + ttl_seconds as i64,
                });
            }
        }

        Ok(ConversationLock {
            conversation_id: id.clone(),
            token,
            ttl_seconds,
        })
    }

    async fn renew_lock(
        &self,
        id: &ConversationId,
        token: &str,
        ttl_seconds: u64,
    ) -> Result<bool, Self::Error> {
        let now = Self::now();
        match self.locks.get_mut(id) {
            Some(mut held) if held.token == token && !held.is_expired(now) => {
                held.expires_at = now + ttl_seconds as i64;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lock(&self, id: &ConversationId, token: &str) -> Result<bool, Self::Error> {
        let removed = self
            .locks
            .remove_if(id, |_, held| held.token == token)
            .is_some();
        Ok(removed)
    }

    async fn sweep_expired(&self) -> Result<Vec<ConversationId>, Self::Error> {
        let now = Self::now();
        let mut swept = Vec::new();
        let active: Vec<ConversationId> = self.active.iter().map(|e| e.key().clone()).collect();

        for id in active {
            let Some(mut record) = self.records.get_mut(&id) else {
                // Record vanished; the index entry is dangling.
                self.active.remove(&id);
                swept.push(id);
                continue;
            };
            if !record.status.is_terminal() && record.expires_at <= now {
                record.try_set_status(ConversationStatus::TimedOut);
                record.completion_reason = Some(CompletionReason::Timeout);
                record.version += 1;
                tracing::warn!(conversation_id = %id, "Conversation expired, marked timed_out");
                swept.push(id);
            }
        }

        if !swept.is_empty() {
            metrics::counter!("store_swept_conversations_total").increment(swept.len() as u64);
        }
        Ok(swept)
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

/// FIFO topic queue backed by a mutex-guarded deque.
#[derive(Default)]
pub struct MemoryTopicQueue {
    queue: Mutex<VecDeque<Topic>>,
}

impl MemoryTopicQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, topic: Topic) {
        self.queue.lock().push_back(topic);
    }
}

#[async_trait]
impl TopicQueue for MemoryTopicQueue {
    type Error = StoreError;

    async fn pop(&self) -> Result<Option<Topic>, Self::Error> {
        Ok(self.queue.lock().pop_front())
    }

    async fn len(&self) -> Result<usize, Self::Error> {
        Ok(self.queue.lock().len())
    }
}
