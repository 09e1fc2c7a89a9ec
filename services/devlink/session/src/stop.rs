//! External stop signal.
//!
//! The handle is shared between the thread running the link and whoever wants
//! it stopped. Stopping wakes a pending reconnect wait immediately.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct StopInner {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Clonable, thread-safe stop signal
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    /// Create a handle that has not been stopped
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake any sleeper
    pub fn stop(&self) {
        let mut stopped = self
            .inner
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.inner.wake.notify_all();
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self
            .inner
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless stopped first.
    ///
    /// Returns `true` if the sleep ended because of a stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        let stopped = self
            .inner
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .inner
            .wake
            .wait_timeout_while(stopped, duration, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_sleep_runs_full_duration() {
        let handle = StopHandle::new();
        let start = Instant::now();
        assert!(!handle.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let handle = StopHandle::new();
        let remote = handle.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.stop();
        });

        let start = Instant::now();
        assert!(handle.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(handle.is_stopped());

        stopper.join().unwrap();
    }

    #[test]
    fn test_sleep_after_stop_returns_immediately() {
        let handle = StopHandle::new();
        handle.stop();
        assert!(handle.sleep(Duration::from_secs(30)));
    }
}
