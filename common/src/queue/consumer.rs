// Dispatch consumer implementation for NATS JetStream

use crate::errors::QueueError;
use crate::models::{DispatchMessage, DISPATCH_MESSAGE_VERSION};
use crate::queue::nats::NatsClient;
use crate::queue::Topic;
use async_nats::jetstream::consumer::PullConsumer;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

/// Callback type for processing dispatch messages.
///
/// Handler errors are part of the contract: they are logged together with
/// the offending payload and consumption continues. Returning an error
/// never stops the stream.
pub type MessageHandler = Arc<
    dyn Fn(DispatchMessage) -> futures::future::BoxFuture<'static, Result<(), anyhow::Error>>
        + Send
        + Sync,
>;

/// Consumer lifecycle. `Consuming` self-loops on every message; transport
/// disconnects fall back to `Connecting` and recover through the underlying
/// client's own reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    Disconnected = 0,
    Connecting = 1,
    Subscribed = 2,
    Consuming = 3,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConsumerState::Connecting,
            2 => ConsumerState::Subscribed,
            3 => ConsumerState::Consuming,
            _ => ConsumerState::Disconnected,
        }
    }
}

/// Process one raw payload from the queue.
///
/// Every failure mode is terminal for this message only: a payload that does
/// not deserialize, or a handler that returns an error, is logged with the
/// raw message content for diagnosis and then skipped. No retry, no
/// dead-lettering.
pub async fn process_payload(topic: Topic, handler: &MessageHandler, payload: &[u8]) {
    crate::telemetry::record_consumer_message(topic.subject());

    let message: DispatchMessage = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(e) => {
            error!(
                topic = %topic,
                error = %e,
                payload = %String::from_utf8_lossy(payload),
                "Failed to deserialize dispatch message, skipping it"
            );
            crate::telemetry::record_consumer_handler_failure(topic.subject());
            return;
        }
    };

    if message.version > DISPATCH_MESSAGE_VERSION {
        warn!(
            message_id = %message.id,
            version = message.version,
            supported = DISPATCH_MESSAGE_VERSION,
            "Dispatch message from a newer producer, attempting to process anyway"
        );
    }

    let message_id = message.id;
    if let Err(e) = handler(message).await {
        error!(
            topic = %topic,
            message_id = %message_id,
            error = %e,
            payload = %String::from_utf8_lossy(payload),
            "Handler failed for dispatch message, skipping it"
        );
        crate::telemetry::record_consumer_handler_failure(topic.subject());
    }
}

/// NATS-based dispatch consumer.
///
/// Pulls messages from one topic continuously (at-least-once delivery from
/// the broker) and hands each to the handler in isolation. Messages are
/// acknowledged whether the handler succeeded or not: "logged and skipped"
/// is the complete failure story for a single bad message.
pub struct NatsDispatchConsumer {
    topic: Topic,
    consumer: PullConsumer,
    handler: MessageHandler,
    state: AtomicU8,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl NatsDispatchConsumer {
    /// Create a consumer for `topic` in the given consumer group.
    #[instrument(skip(client, handler))]
    pub async fn new(
        client: &NatsClient,
        topic: Topic,
        group_id: &str,
        from_beginning: bool,
        handler: MessageHandler,
    ) -> Result<Self, QueueError> {
        info!(topic = %topic, group_id = group_id, "Creating dispatch consumer");

        let consumer = client
            .get_or_create_consumer(topic, group_id, from_beginning)
            .await?;

        Ok(Self {
            topic,
            consumer,
            handler,
            state: AtomicU8::new(ConsumerState::Subscribed as u8),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = ConsumerState::from_u8(self.state.swap(next as u8, Ordering::Relaxed));
        if previous != next {
            debug!(topic = %self.topic, from = ?previous, to = ?next, "Consumer state transition");
        }
    }

    /// Consume messages until shutdown is requested.
    ///
    /// The loop must survive individual poison messages indefinitely; the
    /// only exits are an explicit shutdown and the message stream ending.
    #[instrument(skip(self), fields(topic = %self.topic))]
    pub async fn start(&self) -> Result<(), QueueError> {
        info!("Starting dispatch consumer");

        let mut messages = self.consumer.messages().await.map_err(|e| {
            QueueError::ConsumeFailed(format!("Failed to create message stream: {}", e))
        })?;

        info!("Consumer started, waiting for messages");

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping consumer");
                break;
            }

            tokio::select! {
                message_result = messages.next() => {
                    match message_result {
                        Some(Ok(message)) => {
                            self.set_state(ConsumerState::Consuming);
                            process_payload(self.topic, &self.handler, &message.payload).await;

                            // Acknowledge regardless of the handler outcome;
                            // failed messages are logged and skipped, not
                            // redelivered.
                            if let Err(e) = message.ack().await {
                                error!(error = %e, "Failed to acknowledge message");
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving message");
                            self.set_state(ConsumerState::Connecting);
                            // The broker client reconnects on its own; back
                            // off briefly before pulling again.
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            self.set_state(ConsumerState::Disconnected);
                            break;
                        }
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    // Loop back to re-check the shutdown flag.
                    continue;
                }
            }
        }

        info!("Consumer stopped gracefully");
        Ok(())
    }

    pub fn shutdown(&self) {
        info!(topic = %self.topic, "Requesting consumer shutdown");
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DispatchMessage, JobStartPayload};
    use std::sync::Mutex;

    fn recording_handler() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |message: DispatchMessage| {
            let sink = sink.clone();
            Box::pin(async move {
                match &message.body {
                    crate::models::DispatchBody::JobStart(payload) => {
                        if payload.job_name == "poison" {
                            anyhow::bail!("handler rejected the message");
                        }
                        sink.lock().unwrap().push(payload.job_name.clone());
                        Ok(())
                    }
                    _ => anyhow::bail!("unexpected message body"),
                }
            })
        });
        (handler, seen)
    }

    fn job_start_payload(job_name: &str) -> Vec<u8> {
        let message = DispatchMessage::job_start(
            JobStartPayload {
                job_name: job_name.to_string(),
                parameters: vec![],
            },
            None,
        );
        serde_json::to_vec(&message).unwrap()
    }

    #[tokio::test]
    async fn handler_error_on_one_message_never_stops_the_stream() {
        let (handler, seen) = recording_handler();

        process_payload(Topic::JobRequests, &handler, &job_start_payload("first")).await;
        process_payload(Topic::JobRequests, &handler, &job_start_payload("poison")).await;
        process_payload(Topic::JobRequests, &handler, &job_start_payload("third")).await;

        assert_eq!(*seen.lock().unwrap(), vec!["first", "third"]);
    }

    #[tokio::test]
    async fn undecodable_payload_is_logged_and_skipped() {
        let (handler, seen) = recording_handler();

        process_payload(Topic::JobRequests, &handler, b"{ not json").await;
        process_payload(Topic::JobRequests, &handler, &job_start_payload("after")).await;

        assert_eq!(*seen.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn newer_envelope_versions_are_still_processed() {
        let (handler, seen) = recording_handler();

        let mut message = DispatchMessage::job_start(
            JobStartPayload {
                job_name: "from-the-future".to_string(),
                parameters: vec![],
            },
            None,
        );
        message.version = DISPATCH_MESSAGE_VERSION + 1;
        let payload = serde_json::to_vec(&message).unwrap();

        process_payload(Topic::JobRequests, &handler, &payload).await;

        assert_eq!(*seen.lock().unwrap(), vec!["from-the-future"]);
    }
}
