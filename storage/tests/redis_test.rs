//! Integration tests for the Redis store and publisher.
//!
//! These use the shared testcontainers fixture and skip when Docker is
//! not available.

use co_core::traits::{ConversationStore, EventPublisher};
use co_core::types::{
    Conversation, ConversationEvent, ConversationId, ConversationStatus, EventKind, Topic, Turn,
};
use errors::StoreError;
use std::time::Duration;
use storage::{RedisPublisher, RedisStore};

fn conversation(title: &str) -> Conversation {
    Conversation::new(
        Topic {
            title: title.to_string(),
            source: "hackernews".to_string(),
            url: None,
        },
        3_600,
    )
}

#[tokio::test]
async fn conversation_crud_round_trip() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let store = RedisStore::new(fixture.url()).await.unwrap();

    let mut conv = conversation(&testing::unique_id("crud"));
    store.create(&conv).await.unwrap();

    let loaded = store.get(&conv.id).await.unwrap().unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.status, ConversationStatus::Created);

    conv.append_turn(Turn {
        sequence: 1,
        provider: "anthropic".to_string(),
        content: "opening".to_string(),
        token_count: 10,
        latency_ms: 100,
        timestamp: 0,
    });
    let version = store.update(&conv, 1).await.unwrap();
    assert_eq!(version, 2);

    // Writing with the stale version is rejected.
    match store.update(&conv, 1).await {
        Err(StoreError::StaleWrite {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected StaleWrite, got {other:?}"),
    }

    let active = store.list_active().await.unwrap();
    assert!(active.contains(&conv.id));

    store.delete(&conv.id).await.unwrap();
    assert!(store.get(&conv.id).await.unwrap().is_none());
    assert!(!store.list_active().await.unwrap().contains(&conv.id));
}

#[tokio::test]
async fn lock_tokens_guard_release_and_renew() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let store = RedisStore::new(fixture.url()).await.unwrap();
    let id = ConversationId::generate();

    let lock = store.acquire_lock(&id, 30).await.unwrap();
    assert!(matches!(
        store.acquire_lock(&id, 30).await,
        Err(StoreError::LockContention { .. })
    ));

    // A stranger's token can neither renew nor release.
    assert!(!store.renew_lock(&id, "stranger", 30).await.unwrap());
    assert!(!store.release_lock(&id, "stranger").await.unwrap());

    assert!(store.renew_lock(&id, &lock.token, 60).await.unwrap());
    assert!(store.release_lock(&id, &lock.token).await.unwrap());

    // Released: the next acquire succeeds.
    assert!(store.acquire_lock(&id, 30).await.is_ok());
}

#[tokio::test]
async fn concurrent_lock_acquisition_admits_one() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let store = std::sync::Arc::new(RedisStore::new(fixture.url()).await.unwrap());
    let id = ConversationId::generate();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store.acquire_lock(&id, 30).await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn sweep_marks_expired_conversations() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let store = RedisStore::new(fixture.url()).await.unwrap();

    let mut conv = conversation(&testing::unique_id("sweep"));
    conv.expires_at = chrono::Utc::now().timestamp();
    store.create(&conv).await.unwrap();

    // The record carries a 1s floor TTL; sweep within that window.
    let swept = store.sweep_expired().await.unwrap();
    assert!(swept.contains(&conv.id));

    if let Some(loaded) = store.get(&conv.id).await.unwrap() {
        assert_eq!(loaded.status, ConversationStatus::TimedOut);
    }
}

#[tokio::test]
async fn publisher_delivers_through_consumer_groups() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let prefix = testing::unique_id("stream");
    let publisher = RedisPublisher::new(fixture.url(), &prefix).unwrap();

    let mut rx = publisher
        .subscribe("orchestration-service", "worker-0", &[EventKind::Turn])
        .await
        .unwrap();

    // Give the consumer loop a beat to issue its first blocking read.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let event = ConversationEvent::Turn {
        conversation_id: ConversationId::generate(),
        sequence_index: 1,
        provider: "anthropic".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
    };
    publisher.publish(event.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed");
    assert_eq!(received, event);
}
