// Trigger binary entry point

use common::config::Settings;
use common::db::repositories::ScheduleRepository;
use common::db::DbPool;
use common::queue::{NatsClient, NatsConfig, NatsDispatchPublisher};
use common::scheduler::{ScheduleCache, ScheduleSource, Trigger, TriggerConfig, TriggerEngine};
use common::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings =
        Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Initialize structured logging and metrics
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    if let Err(e) = telemetry::init_metrics(settings.observability.metrics_port) {
        error!(error = %e, "Failed to initialize metrics exporter, continuing without it");
    }

    info!("Starting Sentinel trigger service");

    // Initialize database connection pool
    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        anyhow::anyhow!("Database initialization error: {}", e)
    })?;
    info!("Database connection pool initialized");

    // Initialize NATS client and the dispatch stream
    let nats_config = NatsConfig {
        url: settings.nats.url.clone(),
        stream_name: settings.nats.stream_name.clone(),
        ..NatsConfig::default()
    };
    let nats_client = NatsClient::new(nats_config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        anyhow::anyhow!("NATS initialization error: {}", e)
    })?;
    nats_client.initialize_stream().await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS stream");
        anyhow::anyhow!("NATS stream error: {}", e)
    })?;
    info!("NATS client and dispatch stream initialized");

    // Wire the schedule cache to the repository
    let source: Arc<dyn ScheduleSource> = Arc::new(ScheduleRepository::new(db_pool.clone()));
    let cache = Arc::new(ScheduleCache::new(
        source,
        Duration::from_millis(settings.trigger.mutex_wait_ms),
        chrono::Utc::now().timestamp_millis(),
    ));

    // Warm the cache before the first sweep; a failure here is not fatal,
    // the periodic refresh retries.
    if let Err(e) = cache.refresh().await {
        error!(error = %e, "Initial cache refresh failed, starting with an empty snapshot");
    }

    // Create the dispatch publisher and the engine
    let publisher = Arc::new(NatsDispatchPublisher::new(nats_client));
    let trigger_config = TriggerConfig {
        tick_interval_seconds: settings.trigger.tick_interval_seconds,
        cache_refresh_interval_seconds: settings.trigger.cache_refresh_interval_seconds,
    };
    let engine = Arc::new(TriggerEngine::new(trigger_config, cache, publisher));
    info!("Trigger engine created");

    // Graceful shutdown on Ctrl+C
    let engine_for_shutdown = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        engine_for_shutdown.stop().await;
    });

    // Run the refresh and sweep loops
    if let Err(e) = engine.start().await {
        error!(error = %e, "Trigger engine error");
        return Err(anyhow::anyhow!("Trigger engine error: {}", e));
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Trigger service stopped");
    Ok(())
}
