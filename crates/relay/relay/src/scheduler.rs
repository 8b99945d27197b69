//! Delayed, cancellable execution of retry attempts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};

/// A unit of work to run once its timer fires.
pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Owns every pending retry timer.
///
/// Scheduling never blocks the caller: each timer is a spawned task that
/// sleeps, unregisters itself and then runs its work. [`stop`](Self::stop)
/// aborts all timers that have not fired yet.
pub struct RetryScheduler {
    timers: Arc<Mutex<HashMap<u64, AbortHandle>>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl RetryScheduler {
    /// Creates a running scheduler with no timers.
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Runs `task` after `delay`. Returns the timer id.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` once the scheduler has been stopped.
    pub async fn schedule(&self, delay: Duration, task: ScheduledTask) -> RelayResult<u64> {
        // Held until the handle is registered, so a zero-delay timer cannot
        // unregister itself before it exists.
        let mut timers = self.timers.lock().await;
        if self.stopped.load(Ordering::Acquire) {
            return Err(RelayError::Internal("retry scheduler is stopped".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.lock().await.remove(&id);
            task.await;
        });

        timers.insert(id, handle.abort_handle());
        debug!(timer_id = id, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        Ok(id)
    }

    /// Cancels every pending timer without running it and refuses further
    /// scheduling. Returns the number of cancelled timers.
    pub async fn stop(&self) -> usize {
        let mut timers = self.timers.lock().await;
        self.stopped.store(true, Ordering::Release);

        let cancelled = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }

        if cancelled > 0 {
            info!(cancelled, "Cancelled pending retries");
        }
        cancelled
    }

    /// Number of timers that have not fired yet.
    pub async fn pending(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new()
    }
}
