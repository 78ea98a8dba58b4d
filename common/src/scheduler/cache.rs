// Schedule cache: periodically refreshed snapshot of schedulable entities

use crate::errors::{StoreError, TriggerError};
use crate::lock::{RunFlag, TimedMutex};
use crate::models::ScheduleEntry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::MutexGuard;
use tracing::{debug, error, instrument, warn};

#[cfg(test)]
use mockall::automock;

/// Source of schedule entries, implemented by the persistence collaborator.
///
/// The store is asked for enabled entries, but the sweep re-checks
/// `is_enabled` per entry: snapshots are stale by design and the CRUD layer
/// may disable an entry between two refreshes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn list_enabled_schedules(&self) -> Result<Vec<ScheduleEntry>, StoreError>;
}

/// State shared between cache refresh, trigger sweep, and manual operations.
pub struct CacheState {
    /// Point-in-time view of all schedulable entities. Replaced wholesale on
    /// refresh, never mutated in place.
    pub entries: Vec<ScheduleEntry>,
    /// Global watermark: the end of the last fully-processed window, shared
    /// by every entry in the snapshot. Advanced only by the trigger sweep.
    ///
    /// Because the watermark is global and not per-entry, a schedule added
    /// between two ticks is evaluated against the same window as every
    /// pre-existing schedule and can fire immediately if its window happens
    /// to fall inside `(window_start, now]`. This mirrors the behavior the
    /// rest of the platform depends on.
    pub window_start_ms: i64,
}

/// Periodically refreshed, in-memory snapshot of all schedulable entities.
///
/// Refresh and sweep serialize on one timed mutex so a half-updated snapshot
/// can never be observed; a refresh that overlaps itself is dropped, and a
/// refresh that fails leaves the previous snapshot in place.
pub struct ScheduleCache {
    state: TimedMutex<CacheState>,
    refresh_flag: RunFlag,
    source: Arc<dyn ScheduleSource>,
}

impl ScheduleCache {
    /// Create an empty cache. `now_ms` seeds the watermark: the first sweep
    /// evaluates windows starting at process startup, not at epoch zero.
    pub fn new(source: Arc<dyn ScheduleSource>, mutex_wait: Duration, now_ms: i64) -> Self {
        Self {
            state: TimedMutex::new(
                CacheState {
                    entries: Vec::new(),
                    window_start_ms: now_ms,
                },
                mutex_wait,
            ),
            refresh_flag: RunFlag::new("cache-refresh"),
            source,
        }
    }

    /// Fetch the current set of entries and swap in a new snapshot.
    ///
    /// A refresh already in progress makes this call return immediately with
    /// a logged warning; that is advisory suppression, not an error. Store
    /// failures and mutex timeouts leave the previous snapshot in place and
    /// propagate for the caller to log. The watermark is never touched here.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), TriggerError> {
        let Some(_token) = self.refresh_flag.try_begin() else {
            warn!("Cache refresh is already running, cancelling this refresh");
            return Ok(());
        };

        let mut state = self.state.acquire().await.map_err(|e| {
            error!(error = %e, "Cache refresh skipped: could not acquire the schedule mutex");
            e
        })?;

        let entries = self.source.list_enabled_schedules().await.map_err(|e| {
            error!(error = %e, "Cache refresh failed, keeping the previous snapshot");
            e
        })?;

        debug!(entry_count = entries.len(), "Schedule cache refreshed");
        crate::telemetry::update_schedule_cache_size(entries.len());
        state.entries = entries;

        Ok(())
    }

    /// Acquire the shared state under the timed mutex.
    pub async fn lock_state(&self) -> Result<MutexGuard<'_, CacheState>, TriggerError> {
        self.state.acquire().await
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_flag.is_running()
    }
}
