//! Pluggable distributed cache backends.
//!
//! A backend is chosen when the [`crate::KeyValueStore`] is constructed. No
//! backend means local-only mode; there is no runtime probing for a client.

pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

pub use self::redis::{RedisBackend, RedisSettings};

/// A shared cache reachable by every API instance.
///
/// Implementations report every failure as an error. The degrading proxy in
/// [`crate::store`] decides what to do about it, so backends never fall back
/// on their own.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Open the connection. Calling `connect` on a connected backend is a no-op.
    async fn connect(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> CacheResult<()>;

    /// Atomically increment the counter at `key` and return the new value.
    ///
    /// `ttl_secs` is applied only when the key has no expiry yet, so the
    /// first increment of a window fixes when it ends.
    async fn incr(&self, key: &str, ttl_secs: Option<u64>) -> CacheResult<i64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Round-trip health probe. Returns the measured latency.
    async fn ping(&self) -> CacheResult<Duration>;

    /// Close the connection. Safe to call repeatedly or before `connect`.
    async fn close(&self);
}
