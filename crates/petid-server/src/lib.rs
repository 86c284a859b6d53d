pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;

use std::sync::Arc;

use petid_cache::{DistributedBackend, KeyValueStore, RedisBackend, SharedClock};

pub use config::{AppConfig, AuthSettings, CacheConfig, RateLimitConfig};
pub use observability::{apply_logging_level, init_tracing};
pub use server::{AppState, PetIdServer, ServerError, build_app};

/// Create the cache store described by `config`.
///
/// ## Cache Modes
///
/// - **Cache disabled**: local store only (DashMap)
/// - **Cache enabled**: Redis plus the local mirror; the connection is opened
///   by [`KeyValueStore::init`]
///
/// An unusable cache configuration falls back to local-only mode instead of
/// preventing startup.
pub fn create_cache_store(config: &CacheConfig, clock: SharedClock) -> Arc<KeyValueStore> {
    let options = config.store_options();

    if !config.enabled {
        tracing::info!("Distributed cache disabled, using local store only");
        return Arc::new(KeyValueStore::new(None, clock, options));
    }

    match config.redis_settings() {
        Ok(settings) => {
            tracing::info!(
                host = %config.url.as_deref().map_or(config.host.as_str(), |_| "<url>"),
                tls = config.tls,
                pool_size = settings.pool_size,
                "Distributed cache enabled"
            );
            let backend: Arc<dyn DistributedBackend> = Arc::new(RedisBackend::new(settings));
            Arc::new(KeyValueStore::new(Some(backend), clock, options))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Invalid distributed cache configuration. Falling back to local store."
            );
            Arc::new(KeyValueStore::new(None, clock, options))
        }
    }
}
