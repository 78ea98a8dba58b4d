// Error handling framework

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },
}

/// Persistence errors from the external store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Store query failed: {0}")]
    QueryFailed(String),

    #[error("Store health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Message deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Trigger engine errors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Timed out after {waited:?} while waiting for the schedule mutex")]
    MutexTimeout { waited: Duration },

    #[error("Schedule not found in the current cache snapshot: {0}")]
    ScheduleNotFound(Uuid),

    #[error("Schedule is disabled and cannot be dispatched: {0}")]
    ScheduleDisabled(Uuid),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::ConnectionFailed(err.to_string())
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}
