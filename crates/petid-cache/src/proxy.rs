//! Fail-open wrapper around a [`DistributedBackend`].
//!
//! Every distributed call made by [`crate::KeyValueStore`] goes through
//! [`DegradingProxy::call`]. A failed call is logged, counted, and reported
//! as `None` so the caller continues against the local store. After a
//! connectivity failure the backend is skipped until the reconnect backoff
//! elapses, then the next call reconnects if needed and probes it again. An
//! error reply to a single command leaves the backend in use for every other
//! call. A closed proxy never calls the backend again.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use crate::backend::DistributedBackend;
use crate::clock::SharedClock;
use crate::error::CacheResult;

pub struct DegradingProxy {
    backend: Arc<dyn DistributedBackend>,
    clock: SharedClock,
    healthy: AtomicBool,
    closed: AtomicBool,
    /// Epoch millis before which calls skip the backend.
    retry_at_ms: AtomicI64,
    backoff: Duration,
}

impl DegradingProxy {
    pub fn new(backend: Arc<dyn DistributedBackend>, clock: SharedClock, backoff: Duration) -> Self {
        Self {
            backend,
            clock,
            healthy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            retry_at_ms: AtomicI64::new(0),
            backoff,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether the last call against the backend succeeded.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn should_attempt(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.is_healthy() || self.clock.now_ms() >= self.retry_at_ms.load(Ordering::Acquire)
    }

    fn mark_up(&self) {
        if !self.healthy.swap(true, Ordering::AcqRel) {
            tracing::info!(backend = self.backend.name(), "Distributed cache available");
        }
    }

    fn mark_down(&self) {
        let retry_at = self
            .clock
            .now_ms()
            .saturating_add(self.backoff.as_millis() as i64);
        self.retry_at_ms.store(retry_at, Ordering::Release);
        if self.healthy.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                backend = self.backend.name(),
                retry_in_ms = self.backoff.as_millis() as u64,
                "Distributed cache unavailable, falling back to local store"
            );
        }
    }

    /// Run `op` against the backend.
    ///
    /// Returns `None` when the backend is in backoff or the call failed.
    pub async fn call<T, F, Fut>(&self, name: &'static str, op: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn DistributedBackend>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        if !self.should_attempt() {
            crate::metrics::record_fallback(name);
            return None;
        }

        if !self.is_healthy() {
            // Reconnect attempt; a no-op for a backend that still holds its pool
            if let Err(e) = self.backend.connect().await {
                tracing::debug!(backend = self.backend.name(), error = %e, "Reconnect attempt failed");
                crate::metrics::record_backend_error("connect");
                crate::metrics::record_fallback(name);
                self.mark_down();
                return None;
            }
        }

        match op(Arc::clone(&self.backend)).await {
            Ok(value) => {
                self.mark_up();
                Some(value)
            }
            Err(e) if e.is_connectivity() => {
                tracing::warn!(
                    backend = self.backend.name(),
                    op = name,
                    error = %e,
                    "Distributed cache call failed, using local store"
                );
                crate::metrics::record_backend_error(name);
                crate::metrics::record_fallback(name);
                self.mark_down();
                None
            }
            Err(e) => {
                // The backend answered; only this call falls back
                tracing::warn!(
                    backend = self.backend.name(),
                    op = name,
                    error = %e,
                    "Distributed cache rejected command, using local store for this call"
                );
                crate::metrics::record_backend_error(name);
                crate::metrics::record_fallback(name);
                None
            }
        }
    }

    /// Open the backend connection, recording the outcome in the health state.
    pub async fn connect(&self) -> bool {
        match self.backend.connect().await {
            Ok(()) => {
                tracing::info!(backend = self.backend.name(), "Connected to distributed cache");
                self.mark_up();
                true
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Failed to connect to distributed cache, using local store only"
                );
                crate::metrics::record_backend_error("connect");
                self.mark_down();
                false
            }
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.backend.close().await;
        self.healthy.store(false, Ordering::Release);
    }
}
