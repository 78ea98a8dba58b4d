// Worker binary entry point: consumer side of the dispatch queue

use common::config::Settings;
use common::db::repositories::{EventSubscriptionRepository, TriggerRepository};
use common::db::DbPool;
use common::dedup::{EventDeduplicator, TriggerStore};
use common::queue::{
    NatsClient, NatsConfig, NatsDispatchConsumer, NatsDispatchPublisher, Topic,
};
use common::telemetry;
use common::worker::findings::{findings_handler, EventSubscriptionSource, FindingsProcessor};
use common::worker::jobs::{job_request_handler, JobLauncher, LoggingJobLauncher};
use std::sync::Arc;
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

    info!("Starting Sentinel worker");

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

    // Producer used by the worker itself: job acceptance logs and
    // event-triggered job starts both go back through the queue.
    let publisher = Arc::new(NatsDispatchPublisher::new(nats_client.clone()));

    // Job-request path
    let launcher: Arc<dyn JobLauncher> = Arc::new(LoggingJobLauncher::new(publisher.clone()));
    let job_consumer = Arc::new(
        NatsDispatchConsumer::new(
            &nats_client,
            Topic::JobRequests,
            &settings.worker.group_id,
            settings.worker.from_beginning,
            job_request_handler(launcher),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create job requests consumer: {}", e))?,
    );

    // Finding-ingestion path: subscriptions + cooldown dedup + dispatch
    let subscriptions: Arc<dyn EventSubscriptionSource> =
        Arc::new(EventSubscriptionRepository::new(db_pool.clone()));
    let trigger_store: Arc<dyn TriggerStore> = Arc::new(TriggerRepository::new(db_pool.clone()));
    let processor = Arc::new(FindingsProcessor::new(
        subscriptions,
        EventDeduplicator::new(trigger_store),
        publisher,
    ));
    let findings_consumer = Arc::new(
        NatsDispatchConsumer::new(
            &nats_client,
            Topic::Findings,
            &settings.worker.group_id,
            settings.worker.from_beginning,
            findings_handler(processor),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create findings consumer: {}", e))?,
    );

    info!("Consumers created, starting consumption");

    // Graceful shutdown on Ctrl+C
    let job_consumer_for_shutdown = job_consumer.clone();
    let findings_consumer_for_shutdown = findings_consumer.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        job_consumer_for_shutdown.shutdown();
        findings_consumer_for_shutdown.shutdown();
    });

    // Run both consumers until shutdown
    let job_task = {
        let consumer = job_consumer.clone();
        tokio::spawn(async move { consumer.start().await })
    };
    let findings_task = {
        let consumer = findings_consumer.clone();
        tokio::spawn(async move { consumer.start().await })
    };

    let (job_result, findings_result) = tokio::join!(job_task, findings_task);
    if let Ok(Err(e)) = job_result {
        error!(error = %e, "Job requests consumer stopped with an error");
    }
    if let Ok(Err(e)) = findings_result {
        error!(error = %e, "Findings consumer stopped with an error");
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Worker stopped");
    Ok(())
}
