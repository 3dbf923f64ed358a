//! Scripted provider for tests.

use async_trait::async_trait;
use co_core::traits::ProviderClient;
use co_core::types::{GeneratedTurn, Turn};
use errors::ClientError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// One scripted generation outcome.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Reply with this content.
    Reply(String),
    /// Reply with this content after a delay.
    ReplyAfter(String, Duration),
    /// Fail with a transient provider error.
    Fail(String),
    /// Fail with a transient provider error after a delay.
    FailAfter(String, Duration),
}

/// Fallback reply bodies with near-disjoint vocabularies, so successive
/// unscripted replies never look repetitive to similarity checks.
const FALLBACK_BODIES: [&str; 6] = [
    "Distributed consensus requires careful quorum tuning across replicas.",
    "Latency budgets shape how aggressively caches prefetch upcoming content.",
    "Ownership semantics eliminate entire classes of memory safety bugs.",
    "Scheduler fairness degrades once queues grow without any bound.",
    "Observability pipelines aggregate traces alongside structured logging output.",
    "Backpressure propagates demand signals upstream through every stage.",
];

/// Provider that plays back a script, then falls back to unique
/// deterministic replies so conversations never repeat by accident.
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<MockResponse>>,
    calls: AtomicU32,
}

impl MockProvider {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_script(name: &str, responses: Vec<MockResponse>) -> Self {
        let provider = Self::new(name);
        *provider.script.lock() = responses.into();
        provider
    }

    /// A provider whose first `n` calls fail with transient errors.
    #[must_use]
    pub fn failing_first(name: &str, n: usize) -> Self {
        let responses = (0..n)
            .map(|i| MockResponse::Fail(format!("scripted failure {}", i + 1)))
            .collect();
        Self::with_script(name, responses)
    }

    pub fn enqueue(&self, response: MockResponse) {
        self.script.lock().push_back(response);
    }

    /// Total calls observed, successful or not.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply(&self, content: String) -> GeneratedTurn {
        GeneratedTurn {
            token_count: (content.len() / 4).max(1) as u32,
            latency_ms: 5,
            content,
        }
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    type Error = ClientError;

    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _prompt: &str,
        history: &[Turn],
    ) -> Result<GeneratedTurn, Self::Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.script.lock().pop_front();

        match scripted {
            Some(MockResponse::Reply(content)) => Ok(self.reply(content)),
            Some(MockResponse::ReplyAfter(content, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.reply(content))
            }
            Some(MockResponse::Fail(reason)) => Err(ClientError::Provider {
                provider: self.name.clone(),
                reason,
            }),
            Some(MockResponse::FailAfter(reason, delay)) => {
                tokio::time::sleep(delay).await;
                Err(ClientError::Provider {
                    provider: self.name.clone(),
                    reason,
                })
            }
            None => {
                let body = FALLBACK_BODIES[(call as usize + history.len()) % FALLBACK_BODIES.len()];
                Ok(self.reply(format!("[{} #{}] {}", self.name, call, body)))
            }
        }
    }
}
