//! meterd: multi-tenant usage metering service
//!
//! Main entry point. Boots the data plane in dependency order:
//! configuration, durable store (with schema init), counter cache, the
//! metering services, the timer-driven aggregation scheduler, and finally
//! the HTTP gateway. Runs until a shutdown signal arrives, then stops the
//! scheduler and drains the server gracefully.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use meterd_api::ApiState;
use meterd_cache::CounterCache;
use meterd_core::MeterConfig;
use meterd_engine::{AggregationEngine, AggregationScheduler, EventService, QuotaEvaluator};
use meterd_storage::{
    AggregateRepository, ApiKeyRepository, EventRepository, QuotaRepository, StoragePool,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = MeterConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase())
            }),
        )
        .init();

    info!("🚀 Starting metering service");

    let storage = StoragePool::connect(&config.database).await?;
    storage.initialize_schema().await?;

    let cache = match CounterCache::connect(&config.redis).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to connect counter cache: {}", e);
            return Err(e.into());
        }
    };

    let pool = storage.pool().clone();
    let event_repo = EventRepository::new(pool.clone());
    let aggregate_repo = AggregateRepository::new(pool.clone());
    let quota_repo = QuotaRepository::new(pool.clone());
    let api_keys = ApiKeyRepository::new(pool);

    let events = EventService::new(event_repo.clone(), cache.clone());
    let aggregates = AggregationEngine::new(event_repo.clone(), aggregate_repo, cache.clone());
    let quotas = QuotaEvaluator::new(quota_repo, event_repo, cache.clone());

    let scheduler = Arc::new(AggregationScheduler::new(
        Arc::new(aggregates.clone()),
        config.aggregation.clone(),
    ));
    scheduler.start().await;

    let state = ApiState {
        events,
        aggregates,
        quotas,
        api_keys,
        storage,
        cache,
    };

    // Serve until Ctrl+C / SIGTERM via the orchestrator.
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("🛑 Shutdown signal received, stopping metering service"),
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    };

    let served = meterd_api::serve(&config.api, state, shutdown).await;
    scheduler.stop().await;
    served?;

    info!("✅ Metering service stopped");
    Ok(())
}
