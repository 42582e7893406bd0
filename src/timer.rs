//! Wall-clock call duration counter

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Counts whole seconds while a call is live.
///
/// Started on successful connection, stopped (and zeroed) on teardown.
/// `start` is idempotent; a running timer keeps its count.
pub struct CallTimer {
    seconds: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl CallTimer {
    /// Create a stopped timer at zero
    #[must_use]
    pub fn new() -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Start counting from zero; a no-op if already running
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.seconds.store(0, Ordering::Relaxed);
        let seconds = Arc::clone(&self.seconds);
        self.task = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately
            ticks.tick().await;
            loop {
                ticks.tick().await;
                seconds.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    /// Stop counting and reset to zero; a no-op if already stopped
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.seconds.store(0, Ordering::Relaxed);
    }

    /// Whether the timer is counting
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Elapsed whole seconds since `start`
    #[must_use]
    pub fn seconds(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }

    /// Shared handle for reading the count without holding the timer
    #[must_use]
    pub fn seconds_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.seconds)
    }
}

impl Default for CallTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
