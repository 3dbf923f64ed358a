//! Event routing: a static kind-to-handler map, validated at startup.
//!
//! Handlers are registered while building; `build` fails unless every
//! event kind the pipeline can emit has a handler, so an unhandled kind
//! is a startup error rather than a runtime surprise.

use co_core::types::{ConversationEvent, EventKind};
use errors::EventError;
use std::collections::HashMap;
use std::sync::Arc;

pub type EventHandler = Arc<dyn Fn(&ConversationEvent) -> anyhow::Result<()> + Send + Sync>;

pub struct EventRouter {
    handlers: HashMap<EventKind, EventHandler>,
}

#[derive(Default)]
pub struct EventRouterBuilder {
    handlers: HashMap<EventKind, EventHandler>,
}

impl EventRouterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&ConversationEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Validates full coverage of [`EventKind::all`].
    pub fn build(self) -> Result<EventRouter, EventError> {
        for kind in EventKind::all() {
            if !self.handlers.contains_key(&kind) {
                return Err(EventError::UnhandledKind {
                    kind: kind.as_str().to_string(),
                });
            }
        }
        Ok(EventRouter {
            handlers: self.handlers,
        })
    }
}

impl EventRouter {
    /// Dispatches one event to its handler. A handler error is returned
    /// to the caller, which owns the dead-letter decision.
    pub fn dispatch(&self, event: &ConversationEvent) -> Result<(), EventError> {
        let handler = self
            .handlers
            .get(&event.kind())
            .ok_or_else(|| EventError::UnhandledKind {
                kind: event.kind().as_str().to_string(),
            })?;

        handler(event).map_err(|e| EventError::DeliveryFailure {
            event_id: format!("{}:{}", event.kind().as_str(), event.conversation_id()),
            attempts: 1,
            reason: e.to_string(),
        })
    }

    /// A router that just logs every event, for consumers that only
    /// need observability.
    pub fn logging() -> Self {
        let log = |event: &ConversationEvent| {
            tracing::info!(
                kind = event.kind().as_str(),
                conversation_id = %event.conversation_id(),
                "Event received"
            );
            Ok(())
        };
        EventRouterBuilder::new()
            .on(EventKind::New, log)
            .on(EventKind::Turn, log)
            .on(EventKind::Response, log)
            .on(EventKind::Completed, log)
            .on(EventKind::Error, log)
            .build()
            .expect("logging router covers every kind")
    }
}
