//! Redis backend over a `deadpool-redis` connection pool.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use parking_lot::RwLock;
use redis::AsyncCommands;

use super::DistributedBackend;
use crate::error::{CacheError, CacheResult};

/// INCR that sets the expiry only when the key has none, so a window is
/// never extended by later increments.
const INCR_FIXED_WINDOW: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = tonumber(ARGV[1])
if ttl > 0 and redis.call('TTL', KEYS[1]) == -1 then
  redis.call('EXPIRE', KEYS[1], ttl)
end
return count
";

/// Connection settings for [`RedisBackend`].
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// `redis://` or `rediss://` URL, password included.
    pub url: String,
    pub pool_size: usize,
    /// Applied to pool wait, create and recycle.
    pub timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            timeout: Duration::from_millis(5000),
        }
    }
}

pub struct RedisBackend {
    settings: RedisSettings,
    pool: RwLock<Option<Pool>>,
    incr_script: redis::Script,
}

impl RedisBackend {
    pub fn new(settings: RedisSettings) -> Self {
        Self {
            settings,
            pool: RwLock::new(None),
            incr_script: redis::Script::new(INCR_FIXED_WINDOW),
        }
    }

    fn create_pool(&self) -> CacheResult<Pool> {
        let mut config = deadpool_redis::Config::from_url(&self.settings.url);
        if let Some(ref mut pool_config) = config.pool {
            pool_config.max_size = self.settings.pool_size;
            pool_config.timeouts.wait = Some(self.settings.timeout);
            pool_config.timeouts.create = Some(self.settings.timeout);
            pool_config.timeouts.recycle = Some(self.settings.timeout);
        } else {
            let mut pool_config = deadpool_redis::PoolConfig::new(self.settings.pool_size);
            pool_config.timeouts.wait = Some(self.settings.timeout);
            pool_config.timeouts.create = Some(self.settings.timeout);
            pool_config.timeouts.recycle = Some(self.settings.timeout);
            config.pool = Some(pool_config);
        }

        config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::Connect(e.to_string()))
    }

    async fn conn(&self, op: &'static str) -> CacheResult<Connection> {
        // Clone the pool out so the lock is not held across the await
        let pool = self.pool.read().clone().ok_or(CacheError::NotConnected)?;
        pool.get().await.map_err(|e| CacheError::backend(op, e))
    }
}

/// Transport failures count as an outage. Any other error is a reply from a
/// reachable server and only fails the one command.
fn redis_error(op: &'static str, err: redis::RedisError) -> CacheError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        CacheError::backend(op, err)
    } else {
        CacheError::command(op, err)
    }
}

#[async_trait]
impl DistributedBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> CacheResult<()> {
        if self.pool.read().is_some() {
            return Ok(());
        }

        let pool = self.create_pool()?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CacheError::Connect(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Connect(e.to_string()))?;
        drop(conn);

        let mut guard = self.pool.write();
        if guard.is_none() {
            *guard = Some(pool);
        } else {
            // Lost a race with a concurrent connect
            pool.close();
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn("get").await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| redis_error("get", e))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> CacheResult<()> {
        let mut conn = self.conn("set").await?;
        let result = match ttl_secs {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl).await,
            None => conn.set::<_, _, ()>(key, value).await,
        };
        result.map_err(|e| redis_error("set", e))
    }

    async fn incr(&self, key: &str, ttl_secs: Option<u64>) -> CacheResult<i64> {
        let mut conn = self.conn("incr").await?;
        let count: i64 = self
            .incr_script
            .key(key)
            .arg(ttl_secs.unwrap_or(0))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_error("incr", e))?;
        Ok(count)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn("exists").await?;
        conn.exists::<_, bool>(key)
            .await
            .map_err(|e| redis_error("exists", e))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn("delete").await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| redis_error("delete", e))
    }

    async fn ping(&self) -> CacheResult<Duration> {
        let started = Instant::now();
        let mut conn = self.conn("ping").await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("ping", e))?;
        Ok(started.elapsed())
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.write().take() {
            pool.close();
            tracing::info!("Redis connection pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_before_connect_report_not_connected() {
        let backend = RedisBackend::new(RedisSettings::default());
        let err = backend.get("key").await.unwrap_err();
        assert!(matches!(err, CacheError::NotConnected));
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_connect() {
        let backend = RedisBackend::new(RedisSettings::default());
        backend.close().await;
        backend.close().await;
        assert!(matches!(
            backend.ping().await,
            Err(CacheError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_host_fails() {
        let backend = RedisBackend::new(RedisSettings {
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 1,
            timeout: Duration::from_millis(200),
        });
        let err = backend.connect().await.unwrap_err();
        assert!(matches!(err, CacheError::Connect(_)));
    }

    #[test]
    fn test_error_replies_are_not_outages() {
        let reply = redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE"));
        let err = redis_error("incr", reply);
        assert!(matches!(err, CacheError::Command { op: "incr", .. }));
        assert!(!err.is_connectivity());

        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        let err = redis_error("get", io);
        assert!(matches!(err, CacheError::Backend { op: "get", .. }));
        assert!(err.is_connectivity());
    }
}
