// Event subscription repository (read-only view for the event path)

use crate::db::DbPool;
use crate::errors::StoreError;
use crate::models::{EventSubscription, JobParameter};
use crate::worker::findings::EventSubscriptionSource;
use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

/// Repository for event-subscription lookups.
///
/// Subscriptions are owned by the CRUD layer; the event path only needs to
/// know which enabled subscriptions react to a given finding key, and with
/// which job and cooldown.
pub struct EventSubscriptionRepository {
    pool: DbPool,
}

impl EventSubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSubscriptionSource for EventSubscriptionRepository {
    #[instrument(skip(self))]
    async fn list_for_finding(
        &self,
        finding_key: &str,
    ) -> Result<Vec<EventSubscription>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, finding_key, job_name, parameters, cooldown_ms, is_enabled
            FROM event_subscriptions
            WHERE finding_key = $1 AND is_enabled = true
            "#,
        )
        .bind(finding_key)
        .fetch_all(self.pool.pool())
        .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let parameters_json: serde_json::Value = row.try_get("parameters")?;
            let parameters: Vec<JobParameter> = serde_json::from_value(parameters_json)
                .map_err(|e| {
                    StoreError::QueryFailed(format!("Failed to parse parameters: {}", e))
                })?;

            subscriptions.push(EventSubscription {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                finding_key: row.try_get("finding_key")?,
                job_name: row.try_get("job_name")?,
                parameters,
                cooldown_ms: row.try_get("cooldown_ms")?,
                is_enabled: row.try_get("is_enabled")?,
            });
        }

        tracing::debug!(
            finding_key = finding_key,
            count = subscriptions.len(),
            "Loaded event subscriptions"
        );
        Ok(subscriptions)
    }
}
