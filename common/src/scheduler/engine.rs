// Trigger engine: periodic sweep over the schedule cache

use crate::errors::TriggerError;
use crate::lock::RunFlag;
use crate::models::{DispatchMessage, ScheduleEntry};
use crate::queue::{DispatchPublisher, Topic};
use crate::scheduler::cache::ScheduleCache;
use crate::scheduler::window;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Configuration for the trigger engine
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// How often the sweep runs (in seconds)
    pub tick_interval_seconds: u64,
    /// How often the schedule cache is refreshed (in seconds)
    pub cache_refresh_interval_seconds: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 10,
            cache_refresh_interval_seconds: 60,
        }
    }
}

/// Trigger trait for the periodic sweep operations
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Run the refresh and sweep loops until shutdown is requested
    async fn start(&self) -> Result<(), TriggerError>;

    /// Request graceful shutdown
    async fn stop(&self);

    /// Run one sweep for the window ending at `now_ms`.
    /// Returns the number of dispatch messages produced.
    async fn tick(&self, now_ms: i64) -> Result<usize, TriggerError>;
}

/// Main trigger engine implementation.
///
/// Walks the schedule cache on every tick, evaluates each entry's cron
/// window against the shared watermark, and publishes one dispatch message
/// per firing entry. The sweep and the cache refresh serialize on the
/// cache's timed mutex; each is additionally guarded by its own reentrancy
/// flag so an overlapping invocation is dropped, never queued.
pub struct TriggerEngine {
    config: TriggerConfig,
    cache: Arc<ScheduleCache>,
    publisher: Arc<dyn DispatchPublisher>,
    tick_flag: RunFlag,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl TriggerEngine {
    pub fn new(
        config: TriggerConfig,
        cache: Arc<ScheduleCache>,
        publisher: Arc<dyn DispatchPublisher>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            cache,
            publisher,
            tick_flag: RunFlag::new("trigger-sweep"),
            shutdown_tx,
        }
    }

    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Refresh the schedule cache out of band. Idempotent, safe to call at
    /// any time; used by the manual "refresh cache now" operation.
    pub async fn refresh_now(&self) -> Result<(), TriggerError> {
        self.cache.refresh().await
    }

    /// Fire one schedule immediately, bypassing the window check.
    ///
    /// The entry is resolved from the current cache snapshot; a schedule
    /// created moments ago becomes fireable after `refresh_now()`. Disabled
    /// entries are refused so that they are never dispatched, manual or not.
    #[instrument(skip(self))]
    pub async fn fire_now(&self, schedule_id: Uuid) -> Result<(), TriggerError> {
        let message = {
            let state = self.cache.lock_state().await?;
            let entry = state
                .entries
                .iter()
                .find(|entry| entry.id == schedule_id)
                .ok_or(TriggerError::ScheduleNotFound(schedule_id))?;

            if !entry.is_enabled {
                return Err(TriggerError::ScheduleDisabled(schedule_id));
            }

            entry.to_dispatch_message()
        };

        self.publisher
            .publish(Topic::JobRequests, std::slice::from_ref(&message))
            .await?;

        info!(schedule_id = %schedule_id, "Schedule fired manually");
        Ok(())
    }

    /// Evaluate every entry of the snapshot against `(window_start, now]`.
    ///
    /// Per-entry evaluation errors are logged with the entry's id and cron
    /// expression and never abort the sweep of the remaining entries.
    /// Disabled entries are evaluated but skipped at dispatch time.
    fn sweep(entries: &[ScheduleEntry], window_start_ms: i64, now_ms: i64) -> Vec<DispatchMessage> {
        let mut messages = Vec::new();

        for entry in entries {
            match window::should_fire(&entry.cron_expression, window_start_ms, now_ms) {
                Ok(false) => {}
                Ok(true) => {
                    if !entry.is_enabled {
                        debug!(
                            schedule_id = %entry.id,
                            schedule_name = %entry.name,
                            "Skipping dispatch for disabled schedule"
                        );
                        continue;
                    }
                    messages.push(entry.to_dispatch_message());
                }
                Err(e) => {
                    error!(
                        schedule_id = %entry.id,
                        cron_expression = %entry.cron_expression,
                        error = %e,
                        "Failed to evaluate schedule, continuing with remaining entries"
                    );
                }
            }
        }

        messages
    }
}

#[async_trait]
impl Trigger for TriggerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), TriggerError> {
        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            cache_refresh_interval_seconds = self.config.cache_refresh_interval_seconds,
            "Starting trigger engine"
        );

        let mut tick_interval = interval(Duration::from_secs(self.config.tick_interval_seconds));
        let mut refresh_interval = interval(Duration::from_secs(
            self.config.cache_refresh_interval_seconds,
        ));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = refresh_interval.tick() => {
                    if let Err(e) = self.cache.refresh().await {
                        error!(error = %e, "Cache refresh failed, keeping the previous snapshot");
                    }
                }
                _ = tick_interval.tick() => {
                    let now_ms = Utc::now().timestamp_millis();
                    match self.tick(now_ms).await {
                        Ok(count) if count > 0 => {
                            info!(dispatched = count, "Trigger sweep dispatched schedules");
                        }
                        Ok(_) => {
                            debug!("No schedules due in this window");
                        }
                        Err(e) => {
                            error!(error = %e, "Trigger sweep failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping trigger engine");
                    break;
                }
            }
        }

        info!("Trigger engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) {
        info!("Stopping trigger engine");
        let _ = self.shutdown_tx.send(());
    }

    /// One sweep over the current snapshot.
    ///
    /// An overlapping invocation no-ops immediately; a mutex-acquisition
    /// timeout skips the tick. The watermark advances to `now_ms` only after
    /// a full pass over the snapshot (per-entry errors are already isolated
    /// inside the pass). Messages publish after the mutex is released, each
    /// batch independently; a publish failure loses the dispatch for this
    /// tick and it recurs on the entry's next qualifying window.
    #[instrument(skip(self))]
    async fn tick(&self, now_ms: i64) -> Result<usize, TriggerError> {
        let Some(_token) = self.tick_flag.try_begin() else {
            warn!("Trigger sweep is already running, cancelling this run");
            crate::telemetry::record_tick_skipped("overlap");
            return Ok(0);
        };

        let sweep_started = std::time::Instant::now();

        let messages = {
            let mut state = match self.cache.lock_state().await {
                Ok(state) => state,
                Err(e @ TriggerError::MutexTimeout { .. }) => {
                    error!(error = %e, "Tick skipped: could not acquire the schedule mutex");
                    crate::telemetry::record_tick_skipped("mutex_timeout");
                    return Ok(0);
                }
                Err(e) => return Err(e),
            };

            let messages = Self::sweep(&state.entries, state.window_start_ms, now_ms);
            state.window_start_ms = now_ms;
            messages
        };

        crate::telemetry::record_sweep_duration(sweep_started.elapsed().as_secs_f64());

        let produced = messages.len();
        if produced > 0 {
            if let Err(e) = self
                .publisher
                .publish(Topic::JobRequests, &messages)
                .await
            {
                error!(
                    error = %e,
                    "Failed to publish dispatches; lost for this tick, they recur on the next qualifying window"
                );
            }
        }

        Ok(produced)
    }
}
