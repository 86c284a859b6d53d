//! Test doubles for the distributed backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use petid_cache::{CacheError, CacheResult, Clock, DistributedBackend, ManualClock};

/// In-memory stand-in for a shared cache, with TTLs on the test clock.
///
/// Several stores can share one `FakeBackend` to model a fleet of instances.
/// Setting it down makes every call fail like an unreachable server.
pub struct FakeBackend {
    clock: Arc<ManualClock>,
    entries: Mutex<HashMap<String, (String, Option<i64>)>>,
    up: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn raw_get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_ms();
        self.entries
            .lock()
            .get(key)
            .filter(|(_, exp)| exp.is_none_or(|e| now < e))
            .map(|(v, _)| v.clone())
    }

    pub fn expiry_of(&self, key: &str) -> Option<i64> {
        self.entries.lock().get(key).and_then(|(_, exp)| *exp)
    }

    fn check(&self, op: &'static str) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::backend(op, "connection refused"))
        }
    }

    fn live(&self, entries: &mut HashMap<String, (String, Option<i64>)>, key: &str) {
        let now = self.clock.now_ms();
        let expired = matches!(entries.get(key), Some((_, Some(exp))) if now >= *exp);
        if expired {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl DistributedBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self) -> CacheResult<()> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Connect("connection refused".to_string()))
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check("get")?;
        let mut entries = self.entries.lock();
        self.live(&mut entries, key);
        Ok(entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> CacheResult<()> {
        self.check("set")?;
        let exp = ttl_secs.map(|ttl| self.clock.now_ms() + ttl as i64 * 1000);
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), exp));
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_secs: Option<u64>) -> CacheResult<i64> {
        self.check("incr")?;
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        self.live(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| ("0".to_string(), None));
        let count: i64 = entry
            .0
            .parse()
            .map_err(|e| CacheError::command("incr", e))?;
        entry.0 = (count + 1).to_string();
        if entry.1.is_none() {
            entry.1 = ttl_secs.map(|ttl| now + ttl as i64 * 1000);
        }
        Ok(count + 1)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check("exists")?;
        let mut entries = self.entries.lock();
        self.live(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check("delete")?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<Duration> {
        self.check("ping")?;
        Ok(Duration::from_millis(2))
    }

    async fn close(&self) {}
}

/// A backend that never answers.
pub struct UnavailableBackend;

#[async_trait]
impl DistributedBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn connect(&self) -> CacheResult<()> {
        Err(CacheError::Connect("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::NotConnected)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: Option<u64>) -> CacheResult<()> {
        Err(CacheError::NotConnected)
    }

    async fn incr(&self, _key: &str, _ttl_secs: Option<u64>) -> CacheResult<i64> {
        Err(CacheError::NotConnected)
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::NotConnected)
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::NotConnected)
    }

    async fn ping(&self) -> CacheResult<Duration> {
        Err(CacheError::NotConnected)
    }

    async fn close(&self) {}
}
