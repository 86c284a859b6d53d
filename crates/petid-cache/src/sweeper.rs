//! Periodic expiry sweep task with an explicit start/stop lifecycle.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Owns a background task that runs a purge callback on a fixed interval.
///
/// The task is a plain tokio task, so it never keeps the runtime alive on
/// shutdown. Stopping aborts it immediately; there is no in-flight state.
pub struct Sweeper {
    name: &'static str,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            handle: Mutex::new(None),
        }
    }

    /// Start the sweep loop. Calling `start` on a running sweeper is a no-op.
    ///
    /// `purge` returns the number of entries it removed.
    pub fn start<F>(&self, purge: F)
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(sweeper = self.name, "No tokio runtime, expiry sweep not started");
                return;
            }
        };

        let name = self.name;
        let interval = self.interval;
        *guard = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = purge();
                if removed > 0 {
                    tracing::debug!(sweeper = name, removed, "expired entries swept");
                }
            }
        }));

        tracing::debug!(
            sweeper = self.name,
            interval_secs = self.interval.as_secs(),
            "expiry sweep started"
        );
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            tracing::debug!(sweeper = self.name, "expiry sweep stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let runs = Arc::new(AtomicUsize::new(0));
        let sweeper = Sweeper::new("test", Duration::from_secs(60));

        let counter = Arc::clone(&runs);
        sweeper.start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        });
        assert!(sweeper.is_running());

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        sweeper.stop();
        assert!(!sweeper.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let sweeper = Sweeper::new("test", Duration::from_secs(60));
        sweeper.start(|| 0);
        sweeper.start(|| 0);
        assert!(sweeper.is_running());
        sweeper.stop();
        sweeper.stop();
        assert!(!sweeper.is_running());
    }

    #[test]
    fn test_start_without_runtime() {
        let sweeper = Sweeper::new("test", Duration::from_secs(60));
        sweeper.start(|| 0);
        assert!(!sweeper.is_running());
    }
}
