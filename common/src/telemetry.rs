// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting and trace context
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracing with an OTLP exporter
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "sentinel-trigger-engine"),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer("sentinel-trigger-engine");

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Shutdown the tracer provider, flushing remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize the Prometheus metrics exporter and describe all metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "dispatch_published_total",
        "Total number of dispatch messages published"
    );
    describe_counter!(
        "dispatch_publish_failed_total",
        "Total number of dispatch messages that failed to publish"
    );
    describe_counter!(
        "trigger_tick_skipped_total",
        "Trigger sweeps skipped by the reentrancy guard or the mutex timeout"
    );
    describe_histogram!(
        "trigger_sweep_duration_seconds",
        "Duration of trigger sweeps in seconds"
    );
    describe_gauge!(
        "schedule_cache_size",
        "Number of entries in the schedule cache snapshot"
    );
    describe_counter!(
        "consumer_messages_total",
        "Total number of messages pulled from the dispatch queue"
    );
    describe_counter!(
        "consumer_handler_failures_total",
        "Messages whose handler failed and that were logged and skipped"
    );

    tracing::info!(
        metrics_port = metrics_port,
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_dispatch_published(kind: &str) {
    counter!("dispatch_published_total", "kind" => kind.to_string()).increment(1);
}

#[inline]
pub fn record_dispatch_publish_failed(kind: &str) {
    counter!("dispatch_publish_failed_total", "kind" => kind.to_string()).increment(1);
}

#[inline]
pub fn record_tick_skipped(reason: &'static str) {
    counter!("trigger_tick_skipped_total", "reason" => reason).increment(1);
}

#[inline]
pub fn record_sweep_duration(duration_seconds: f64) {
    histogram!("trigger_sweep_duration_seconds").record(duration_seconds);
}

#[inline]
pub fn update_schedule_cache_size(size: usize) {
    gauge!("schedule_cache_size").set(size as f64);
}

#[inline]
pub fn record_consumer_message(topic: &str) {
    counter!("consumer_messages_total", "topic" => topic.to_string()).increment(1);
}

#[inline]
pub fn record_consumer_handler_failure(topic: &str) {
    counter!("consumer_handler_failures_total", "topic" => topic.to_string()).increment(1);
}
