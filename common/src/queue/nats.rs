// NATS JetStream client for the dispatch queue

use crate::errors::QueueError;
use crate::queue::Topic;
use async_nats::jetstream::{
    consumer::{pull::Config as PullConfig, DeliverPolicy, PullConsumer},
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream name for dispatch messages
    pub stream_name: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Maximum number of messages to retain
    pub max_messages: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "DISPATCH".to_string(),
            max_age_seconds: 86400, // 24 hours
            max_messages: 1_000_000,
        }
    }
}

/// NATS JetStream client
#[derive(Clone)]
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Create a new NATS client and connect to the server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server successfully");

        let jetstream = async_nats::jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Initialize the dispatch stream covering all dispatch subjects
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(
            stream_name = %self.config.stream_name,
            "Initializing JetStream stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec!["dispatch.>".to_string()],
            retention: RetentionPolicy::WorkQueue, // Messages deleted after acknowledgment
            max_age: Duration::from_secs(self.config.max_age_seconds),
            max_messages: self.config.max_messages,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        info!(
            stream_name = %self.config.stream_name,
            "Stream initialized successfully"
        );

        Ok(stream)
    }

    /// Create or get a durable pull consumer for one topic and group.
    ///
    /// `from_beginning` maps to the deliver policy: replay everything still
    /// retained, or only messages published after the consumer existed.
    #[instrument(skip(self))]
    pub async fn get_or_create_consumer(
        &self,
        topic: Topic,
        group_id: &str,
        from_beginning: bool,
    ) -> Result<PullConsumer, QueueError> {
        let durable_name = format!("{}-{}", group_id, topic.subject().replace('.', "-"));

        info!(consumer_name = %durable_name, topic = %topic, "Creating consumer");

        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::StreamNotFound(format!("Stream not found: {}", e)))?;

        let consumer_config = PullConfig {
            durable_name: Some(durable_name.clone()),
            filter_subject: topic.subject().to_string(),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            deliver_policy: if from_beginning {
                DeliverPolicy::All
            } else {
                DeliverPolicy::New
            },
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&durable_name, consumer_config)
            .await
            .map_err(|e| {
                QueueError::ConsumerCreation(format!("Failed to create consumer: {}", e))
            })?;

        info!(consumer_name = %durable_name, "Consumer created successfully");

        Ok(consumer)
    }

    /// Get the JetStream context for publishing
    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    /// Get the NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Health check - verify the stream is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::HealthCheck(format!("Health check failed: {}", e)))?;

        Ok(())
    }
}
