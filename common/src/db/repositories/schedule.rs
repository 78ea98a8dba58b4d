// Schedule repository: unified read model over alarms and cron subscriptions

use crate::db::DbPool;
use crate::errors::StoreError;
use crate::models::{ScheduleAction, ScheduleEntry};
use crate::scheduler::cache::ScheduleSource;
use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

/// Repository for schedule-related database operations.
///
/// The `schedules` table is the CRUD layer's unified view of alarms and cron
/// subscriptions; the polymorphic action is stored as a tagged JSON document.
/// This core only reads it.
pub struct ScheduleRepository {
    pool: DbPool,
}

impl ScheduleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleSource for ScheduleRepository {
    #[instrument(skip(self))]
    async fn list_enabled_schedules(&self) -> Result<Vec<ScheduleEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, cron_expression, is_enabled, action
            FROM schedules
            WHERE is_enabled = true
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let action_json: serde_json::Value = row.try_get("action")?;
            let action: ScheduleAction = serde_json::from_value(action_json)
                .map_err(|e| StoreError::QueryFailed(format!("Failed to parse action: {}", e)))?;

            entries.push(ScheduleEntry {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                cron_expression: row.try_get("cron_expression")?,
                is_enabled: row.try_get("is_enabled")?,
                action,
            });
        }

        tracing::debug!(count = entries.len(), "Loaded schedule entries");
        Ok(entries)
    }
}
