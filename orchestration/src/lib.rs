//! # Conversation Orchestration
//!
//! The state machine driving multi-provider conversations, the bounded
//! worker pool that owns orchestrator runs, structural quality
//! assessment, and the durable event pipeline jobs.

pub mod durable_events;
pub mod jobs;
pub mod orchestrator;
pub mod quality;
pub mod router;
pub mod worker;

pub use durable_events::{DlqResult, DurableEventPublisher, IdempotentConsumer, RetryResult};
pub use jobs::{MaintenanceScheduler, MaintenanceSettings};
pub use orchestrator::{ConversationOutcome, Orchestrator, OrchestratorSettings};
pub use quality::QualityAssessor;
pub use router::{EventRouter, EventRouterBuilder};
pub use worker::{WorkerPool, WorkerPoolSettings};
