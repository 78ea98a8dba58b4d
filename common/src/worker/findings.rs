// Finding ingestion: event-triggered job dispatch with cooldown dedup

use crate::dedup::EventDeduplicator;
use crate::errors::StoreError;
use crate::models::{
    DispatchBody, DispatchMessage, EventSubscription, Finding, FindingBatch, JobParameter,
    JobStartPayload,
};
use crate::queue::{DispatchPublisher, MessageHandler, Topic};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

/// Source of event subscriptions, implemented by the persistence
/// collaborator. Only enabled subscriptions for the given finding key are
/// expected back; the processor re-checks the flag anyway.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSubscriptionSource: Send + Sync {
    async fn list_for_finding(
        &self,
        finding_key: &str,
    ) -> Result<Vec<EventSubscription>, StoreError>;
}

/// Turns consumed finding batches into event-triggered job dispatches.
///
/// For every finding, each enabled subscription on the finding's key gets
/// one dispatch attempt, gated by the cooldown deduplicator on
/// `(subscription, correlation key)`. Event-driven dispatches are
/// fire-and-forget: a publish failure is logged as a missed notification and
/// dropped, never retried. Errors are isolated per finding and per
/// subscription.
pub struct FindingsProcessor {
    subscriptions: Arc<dyn EventSubscriptionSource>,
    dedup: EventDeduplicator,
    publisher: Arc<dyn DispatchPublisher>,
}

impl FindingsProcessor {
    pub fn new(
        subscriptions: Arc<dyn EventSubscriptionSource>,
        dedup: EventDeduplicator,
        publisher: Arc<dyn DispatchPublisher>,
    ) -> Self {
        Self {
            subscriptions,
            dedup,
            publisher,
        }
    }

    /// Process one finding batch. Returns the number of dispatched jobs.
    #[instrument(skip(self, batch), fields(finding_count = batch.findings.len()))]
    pub async fn process(&self, batch: &FindingBatch, now_ms: i64) -> usize {
        let mut dispatched = 0;
        for finding in &batch.findings {
            dispatched += self.process_finding(finding, now_ms).await;
        }
        if dispatched > 0 {
            info!(dispatched, "Finding batch triggered job dispatches");
        }
        dispatched
    }

    async fn process_finding(&self, finding: &Finding, now_ms: i64) -> usize {
        let subscriptions = match self.subscriptions.list_for_finding(&finding.key).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(
                    finding_key = %finding.key,
                    error = %e,
                    "Failed to load event subscriptions, skipping this finding"
                );
                return 0;
            }
        };

        let mut dispatched = 0;
        for subscription in subscriptions {
            if !subscription.is_enabled {
                debug!(
                    subscription_name = %subscription.name,
                    "Skipping dispatch; subscription is disabled"
                );
                continue;
            }

            if !self
                .dedup
                .should_dispatch(
                    subscription.id,
                    &finding.correlation_key,
                    subscription.cooldown_ms,
                    now_ms,
                )
                .await
            {
                debug!(
                    subscription_name = %subscription.name,
                    correlation_key = %finding.correlation_key,
                    "Cooldown active, skipping dispatch"
                );
                continue;
            }

            let message = Self::build_dispatch(&subscription, finding);
            match self
                .publisher
                .publish(Topic::JobRequests, std::slice::from_ref(&message))
                .await
            {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    // Event-driven dispatch is fire-and-forget: the cooldown
                    // was consumed, the notification is missed.
                    error!(
                        subscription_id = %subscription.id,
                        correlation_key = %finding.correlation_key,
                        error = %e,
                        "Missed event notification; dispatch dropped without retry"
                    );
                }
            }
        }

        dispatched
    }

    /// Build the job-start message for a subscription reacting to a finding.
    /// The finding itself rides along as a parameter so the job can reference
    /// what it reacted to.
    fn build_dispatch(subscription: &EventSubscription, finding: &Finding) -> DispatchMessage {
        let mut parameters = subscription.parameters.clone();
        parameters.push(JobParameter {
            name: "finding".to_string(),
            value: serde_json::json!({
                "key": finding.key,
                "correlationKey": finding.correlation_key,
                "data": finding.data,
            }),
        });

        DispatchMessage::job_start(
            JobStartPayload {
                job_name: subscription.job_name.clone(),
                parameters,
            },
            Some(subscription.id),
        )
    }
}

/// Build the consumer handler for the findings topic.
pub fn findings_handler(processor: Arc<FindingsProcessor>) -> MessageHandler {
    Arc::new(move |message: DispatchMessage| {
        let processor = processor.clone();
        Box::pin(async move {
            let kind = message.kind();
            match message.body {
                DispatchBody::Finding(batch) => {
                    processor
                        .process(&batch, Utc::now().timestamp_millis())
                        .await;
                    Ok(())
                }
                _ => anyhow::bail!("unexpected '{}' message on the findings topic", kind),
            }
        })
    })
}
