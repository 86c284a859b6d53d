//! Key-value store with an optional distributed tier and a local fallback.
//!
//! ## Write Strategy
//!
//! Every `set`, `increment` and `delete` is applied to the local store,
//! whatever the distributed backend does. If the backend is down or flaps,
//! the writing instance keeps its own state; other instances do not see it
//! until the backend returns.
//!
//! ## Read Strategy
//!
//! Reads go to the distributed backend while it is healthy. On any backend
//! error the same read is answered from the local store. Callers are never
//! told that degradation happened; only [`KeyValueStore::health`] shows it.
//!
//! ## Consistency
//!
//! Without a reachable backend each instance counts on its own, so a rate
//! limit becomes per-instance for the duration of an outage. This is accepted:
//! rejecting every request while the cache is unreachable would be worse.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::backend::DistributedBackend;
use crate::clock::SharedClock;
use crate::error::CacheResult;
use crate::local::LocalFallbackStore;
use crate::proxy::DegradingProxy;
use crate::sweeper::Sweeper;

/// Default interval between local expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default time a failed backend is skipped before it is probed again.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub sweep_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

/// Which tier is currently answering reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Distributed,
    Local,
}

/// Health report for operational probes.
///
/// `available` refers to the distributed backend: `false` means reads and
/// writes are being served by the local store only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub available: bool,
    pub backend: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl StoreHealth {
    fn local() -> Self {
        Self {
            available: false,
            backend: BackendKind::Local,
            latency_ms: None,
        }
    }
}

pub struct KeyValueStore {
    local: Arc<LocalFallbackStore>,
    remote: Option<DegradingProxy>,
    clock: SharedClock,
    sweeper: Sweeper,
}

impl KeyValueStore {
    /// Create a store. `backend = None` means local-only mode.
    pub fn new(
        backend: Option<Arc<dyn DistributedBackend>>,
        clock: SharedClock,
        options: StoreOptions,
    ) -> Self {
        Self {
            local: Arc::new(LocalFallbackStore::new(Arc::clone(&clock))),
            remote: backend.map(|backend| {
                DegradingProxy::new(backend, Arc::clone(&clock), options.reconnect_backoff)
            }),
            clock,
            sweeper: Sweeper::new("cache", options.sweep_interval),
        }
    }

    pub fn local_only(clock: SharedClock) -> Self {
        Self::new(None, clock, StoreOptions::default())
    }

    /// Connect the distributed backend, if any, and start the expiry sweep.
    ///
    /// A failed connection leaves the store in local-only mode; later calls
    /// retry the backend after the reconnect backoff.
    pub async fn init(&self) {
        match &self.remote {
            Some(remote) => {
                remote.connect().await;
            }
            None => tracing::info!("Distributed cache disabled, using local store only"),
        }

        let local = Arc::clone(&self.local);
        self.sweeper.start(move || local.purge_expired());
    }

    /// Stop the expiry sweep, then close the backend connection. Idempotent.
    pub async fn close(&self) {
        self.sweeper.stop();
        if let Some(remote) = &self.remote {
            remote.close().await;
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn local(&self) -> &LocalFallbackStore {
        &self.local
    }

    async fn remote<T, F, Fut>(&self, name: &'static str, op: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn DistributedBackend>) -> Fut,
        Fut: std::future::Future<Output = CacheResult<T>>,
    {
        match &self.remote {
            Some(remote) => remote.call(name, op).await,
            None => None,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.remote("get", |b| async move { b.get(key).await }).await {
            tracing::debug!(key = %key, hit = value.is_some(), "cache get (distributed)");
            return value;
        }
        self.local.get(key)
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        self.local.set(key, value, ttl_secs);
        if self
            .remote("set", |b| async move { b.set(key, value, ttl_secs).await })
            .await
            .is_some()
        {
            tracing::debug!(key = %key, ttl_secs = ?ttl_secs, "cache set (local+distributed)");
        }
    }

    pub async fn delete(&self, key: &str) {
        self.local.delete(key);
        self.remote("delete", |b| async move { b.delete(key).await })
            .await;
    }

    /// Increment the counter at `key` and return its new value.
    ///
    /// `ttl_secs` only applies when the counter is created; later calls never
    /// extend the window. The distributed count wins when the backend answers.
    /// A disagreeing or failed local mirror is tolerated in that case.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CacheError::NotAnInteger`] when the backend is not
    /// answering and the local value at `key` is not a counter.
    pub async fn increment(&self, key: &str, ttl_secs: Option<u64>) -> CacheResult<i64> {
        let distributed = self
            .remote("incr", |b| async move { b.incr(key, ttl_secs).await })
            .await;
        let local = self.local.increment(key, ttl_secs);

        match (distributed, local) {
            (Some(count), Ok(_)) => Ok(count),
            (Some(count), Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Local counter mirror failed");
                Ok(count)
            }
            (None, local) => local,
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(found) = self.distributed_exists(key).await {
            return found;
        }
        self.local.exists(key)
    }

    /// Ask only the distributed backend whether `key` exists.
    ///
    /// Returns `None` when there is no backend or it did not answer.
    pub async fn distributed_exists(&self, key: &str) -> Option<bool> {
        self.remote("exists", |b| async move { b.exists(key).await })
            .await
    }

    /// Probe the distributed backend.
    pub async fn health(&self) -> StoreHealth {
        crate::metrics::set_local_entries(self.local.len());

        let Some(latency) = self.remote("ping", |b| async move { b.ping().await }).await else {
            return StoreHealth::local();
        };

        StoreHealth {
            available: true,
            backend: BackendKind::Distributed,
            latency_ms: Some(latency.as_millis() as u64),
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("local_entries", &self.local.len())
            .field(
                "backend",
                &self.remote.as_ref().map(DegradingProxy::backend_name),
            )
            .finish()
    }
}
