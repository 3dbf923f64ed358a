use clap::Parser;
use clients::ClientRegistry;
use co_core::types::EventKind;
use config::Config;
use orchestration::{
    DurableEventPublisher, EventRouter, MaintenanceScheduler, MaintenanceSettings, Orchestrator,
    OrchestratorSettings, QualityAssessor, WorkerPool, WorkerPoolSettings,
};
use std::path::PathBuf;
use std::sync::Arc;
use storage::{RedisPublisher, RedisStore, RedisTopicQueue};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Multi-provider conversation orchestration service.
#[derive(Debug, Parser)]
#[command(name = "colloquyd", version)]
struct Args {
    /// Optional JSON configuration file; environment variables override
    /// its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&raw)?
        }
        None => Config::default(),
    };
    config::loader::apply_env(&mut config)?;
    config::validate(&config)?;
    info!("Configuration loaded and validated");

    let redis_url = config.redis.url();
    let store = Arc::new(RedisStore::new(&redis_url).await?);
    let topics = Arc::new(RedisTopicQueue::new(&redis_url).await?);
    let bus = Arc::new(RedisPublisher::new(
        &redis_url,
        &config.events.stream_prefix,
    )?);
    let events = Arc::new(DurableEventPublisher::new(
        bus.clone(),
        config.events.max_delivery_attempts,
    ));

    let registry = Arc::new(ClientRegistry::from_config(&config.providers)?);
    info!(providers = registry.len(), "Client registry ready");

    // An unhandled event kind is a startup error, not a runtime one.
    let router = EventRouter::logging();
    let consumer = {
        use co_core::traits::EventPublisher;
        let mut rx = bus
            .subscribe(
                &config.events.consumer_group,
                &config.events.consumer_name,
                &EventKind::all(),
            )
            .await?;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = router.dispatch(&event) {
                    tracing::error!(error = %e, "Event dispatch failed");
                }
            }
        })
    };

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        registry,
        events.clone(),
        QualityAssessor::new(&config.conversation),
        OrchestratorSettings::from(&config),
    ));

    let (pool, mut outcomes) = WorkerPool::new(
        orchestrator,
        topics,
        WorkerPoolSettings::from(&config.worker),
    );
    let scheduler = MaintenanceScheduler::new(store, events, MaintenanceSettings::from(&config));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let pool_task = {
        let shutdown = shutdown_rx.clone();
        let pool = Arc::new(pool);
        tokio::spawn(async move { pool.run(shutdown).await })
    };
    let scheduler_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };
    let outcome_task = tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            info!(
                conversation_id = %outcome.conversation_id,
                status = %outcome.status,
                turns = outcome.turn_count,
                quality_score = outcome.quality_score,
                "Conversation finished"
            );
        }
    });

    info!("colloquyd running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining");

    shutdown_tx.send(true)?;
    let _ = pool_task.await;
    let _ = scheduler_task.await;
    outcome_task.abort();
    consumer.abort();

    info!("Shutdown complete");
    Ok(())
}
