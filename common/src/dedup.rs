// Cooldown deduplication for event-triggered dispatch

use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// The atomic primitive behind event deduplication, implemented by the
/// persistence collaborator.
///
/// `get_or_upsert_trigger` must read-or-create the trigger record for
/// `(subscription_id, correlation_key)` and conditionally advance its
/// `last_trigger` in a single atomic operation against the store: event
/// deliveries are not serialized by any in-process lock, and two concurrent
/// qualifying events for the same key must not both pass the cooldown check.
/// Returns true iff the caller owns a dispatch.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn get_or_upsert_trigger(
        &self,
        subscription_id: Uuid,
        correlation_key: &str,
        now_ms: i64,
        cooldown_ms: i64,
    ) -> Result<bool, StoreError>;
}

/// Cooldown gate for event-sourced triggers.
///
/// The first qualifying event for a `(subscription, correlation key)` pair
/// always dispatches; later events dispatch only once the cooldown has
/// elapsed since the last allowed dispatch. A store failure is ambiguous
/// state, so it fails closed: no dispatch.
pub struct EventDeduplicator {
    store: Arc<dyn TriggerStore>,
}

impl EventDeduplicator {
    pub fn new(store: Arc<dyn TriggerStore>) -> Self {
        Self { store }
    }

    /// Whether a dispatch for this event is allowed now. Updates the trigger
    /// record when it is.
    #[instrument(skip(self))]
    pub async fn should_dispatch(
        &self,
        subscription_id: Uuid,
        correlation_key: &str,
        cooldown_ms: i64,
        now_ms: i64,
    ) -> bool {
        match self
            .store
            .get_or_upsert_trigger(subscription_id, correlation_key, now_ms, cooldown_ms)
            .await
        {
            Ok(fired) => {
                debug!(
                    subscription_id = %subscription_id,
                    correlation_key = correlation_key,
                    fired,
                    "Trigger attempt evaluated"
                );
                fired
            }
            Err(e) => {
                error!(
                    subscription_id = %subscription_id,
                    correlation_key = correlation_key,
                    error = %e,
                    "Trigger store unavailable, failing closed (no dispatch)"
                );
                false
            }
        }
    }
}

/// In-memory trigger store for tests and single-process deployments.
///
/// The whole check-and-set runs under one map lock, giving the same
/// atomicity the conditional upsert provides server-side.
#[derive(Default)]
pub struct InMemoryTriggerStore {
    triggers: Mutex<HashMap<(Uuid, String), i64>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerStore for InMemoryTriggerStore {
    async fn get_or_upsert_trigger(
        &self,
        subscription_id: Uuid,
        correlation_key: &str,
        now_ms: i64,
        cooldown_ms: i64,
    ) -> Result<bool, StoreError> {
        let mut triggers = self.triggers.lock().await;

        match triggers.get_mut(&(subscription_id, correlation_key.to_string())) {
            Some(last_trigger) => {
                if now_ms - *last_trigger >= cooldown_ms {
                    *last_trigger = now_ms;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => {
                triggers.insert((subscription_id, correlation_key.to_string()), now_ms);
                Ok(true)
            }
        }
    }
}
