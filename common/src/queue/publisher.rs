// Dispatch publisher implementation for NATS JetStream

use crate::errors::QueueError;
use crate::models::DispatchMessage;
use crate::queue::nats::NatsClient;
use crate::queue::Topic;
use async_nats::jetstream::context::PublishAckFuture;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// DispatchPublisher trait for publishing dispatch messages to the queue.
///
/// A batch maps to one broker message per dispatch message, published
/// independently: one failing item never drops the remaining items of the
/// batch. Callers are expected to log-and-continue on failure rather than
/// crash: a cron-driven dispatch that fails to publish recurs on the next
/// qualifying window, an event-driven one is dropped.
#[async_trait::async_trait]
pub trait DispatchPublisher: Send + Sync {
    async fn publish(&self, topic: Topic, messages: &[DispatchMessage]) -> Result<(), QueueError>;
}

/// NATS-based dispatch publisher implementation
pub struct NatsDispatchPublisher {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsDispatchPublisher {
    pub fn new(client: NatsClient) -> Self {
        Self {
            client,
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Publish one message and await its acknowledgment.
    async fn publish_one(
        &self,
        topic: Topic,
        message: &DispatchMessage,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize dispatch message: {}", e))
        })?;

        let jetstream = self.client.jetstream();

        // The message id doubles as the broker deduplication key.
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message.id.to_string().as_str());
        if let Some(correlation_id) = message.correlation_id {
            headers.insert("Correlation-Id", correlation_id.to_string().as_str());
        }

        let publish_future: PublishAckFuture = jetstream
            .publish_with_headers(topic.subject(), headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        match tokio::time::timeout(self.publish_timeout, publish_future).await {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}

#[async_trait::async_trait]
impl DispatchPublisher for NatsDispatchPublisher {
    #[instrument(skip(self, messages), fields(topic = %topic, batch_size = messages.len()))]
    async fn publish(&self, topic: Topic, messages: &[DispatchMessage]) -> Result<(), QueueError> {
        let mut failed = 0usize;

        for message in messages {
            match self.publish_one(topic, message).await {
                Ok(()) => {
                    debug!(
                        message_id = %message.id,
                        kind = message.kind(),
                        "Dispatch message published"
                    );
                    crate::telemetry::record_dispatch_published(message.kind());
                }
                Err(e) => {
                    failed += 1;
                    error!(
                        message_id = %message.id,
                        kind = message.kind(),
                        error = %e,
                        "Failed to publish dispatch message"
                    );
                    crate::telemetry::record_dispatch_publish_failed(message.kind());
                }
            }
        }

        if failed > 0 {
            return Err(QueueError::PublishFailed(format!(
                "{} of {} messages failed to publish to {}",
                failed,
                messages.len(),
                topic
            )));
        }

        info!(published = messages.len(), "Dispatch batch published");
        Ok(())
    }
}

/// Publisher that logs and drops every message.
///
/// Stands in for the broker in unit tests and single-process setups, the
/// same role the platform's null queues play in its test environments.
#[derive(Default)]
pub struct NullDispatchPublisher;

#[async_trait::async_trait]
impl DispatchPublisher for NullDispatchPublisher {
    async fn publish(&self, topic: Topic, messages: &[DispatchMessage]) -> Result<(), QueueError> {
        debug!(
            topic = %topic,
            dropped = messages.len(),
            "Null publisher dropped dispatch batch"
        );
        Ok(())
    }
}
