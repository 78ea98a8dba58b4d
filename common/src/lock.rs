// In-process concurrency guards for the trigger engine

use crate::errors::TriggerError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A mutex with a bounded-wait acquire.
///
/// The schedule cache snapshot and its watermark are shared between the cache
/// refresh task, the trigger sweep, and the manual refresh/fire operations;
/// all of them serialize on one `TimedMutex`. A timed-out acquire means
/// "skip this invocation", never a fatal error, so the system stays live when
/// the store is slow. The guard releases the lock on every exit path.
pub struct TimedMutex<T> {
    inner: Mutex<T>,
    wait: Duration,
}

impl<T> TimedMutex<T> {
    pub fn new(value: T, wait: Duration) -> Self {
        Self {
            inner: Mutex::new(value),
            wait,
        }
    }

    /// Acquire the lock, waiting at most the configured duration.
    pub async fn acquire(&self) -> Result<MutexGuard<'_, T>, TriggerError> {
        tokio::time::timeout(self.wait, self.inner.lock())
            .await
            .map_err(|_| TriggerError::MutexTimeout { waited: self.wait })
    }

    /// Maximum time an acquire may wait.
    pub fn wait(&self) -> Duration {
        self.wait
    }
}

/// Reentrancy guard for a periodic task.
///
/// If invocation N+1 of a task fires before invocation N has released its
/// token, N+1 must be dropped entirely, not queued. The token resets the flag
/// when dropped, so an early return or panic in the task body cannot leave
/// the flag stuck.
pub struct RunFlag {
    name: &'static str,
    running: AtomicBool,
}

impl RunFlag {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: AtomicBool::new(false),
        }
    }

    /// Try to mark the task as running. Returns `None` when an earlier
    /// invocation still holds the flag.
    pub fn try_begin(&self) -> Option<RunToken<'_>> {
        if self.running.swap(true, Ordering::SeqCst) {
            None
        } else {
            debug!(task = self.name, "Run flag acquired");
            Some(RunToken { flag: self })
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct RunToken<'a> {
    flag: &'a RunFlag,
}

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.flag.running.store(false, Ordering::SeqCst);
        debug!(task = self.flag.name, "Run flag released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let mutex = TimedMutex::new(0u32, Duration::from_millis(100));

        {
            let mut guard = mutex.acquire().await.unwrap();
            *guard += 1;
        }

        let guard = mutex.acquire().await.unwrap();
        assert_eq!(*guard, 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_held() {
        let mutex = TimedMutex::new((), Duration::from_millis(20));
        let _held = mutex.acquire().await.unwrap();

        let result = mutex.acquire().await;
        assert!(matches!(result, Err(TriggerError::MutexTimeout { .. })));
    }

    #[tokio::test]
    async fn test_lock_is_usable_after_timeout() {
        let mutex = TimedMutex::new((), Duration::from_millis(20));

        {
            let _held = mutex.acquire().await.unwrap();
            assert!(mutex.acquire().await.is_err());
        }

        assert!(mutex.acquire().await.is_ok());
    }

    #[test]
    fn test_run_flag_drops_overlapping_invocation() {
        let flag = RunFlag::new("test");

        let token = flag.try_begin().expect("first invocation runs");
        assert!(flag.try_begin().is_none());
        drop(token);

        assert!(flag.try_begin().is_some());
    }

    #[test]
    fn test_run_flag_releases_on_panic() {
        let flag = RunFlag::new("test");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _token = flag.try_begin().unwrap();
            panic!("task body panicked");
        }));
        assert!(result.is_err());

        assert!(!flag.is_running());
        assert!(flag.try_begin().is_some());
    }
}
