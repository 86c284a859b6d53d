//! In-process fallback store (DashMap) with TTL support.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::SharedClock;
use crate::error::{CacheError, CacheResult};

/// A locally cached value with an optional absolute expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalEntry {
    pub value: String,
    /// Expiry in epoch milliseconds; `None` means the entry never expires.
    pub expires_at_ms: Option<i64>,
}

impl LocalEntry {
    fn new(value: String, now_ms: i64, ttl_secs: Option<u64>) -> Self {
        Self {
            value,
            expires_at_ms: ttl_secs.map(|ttl| expiry_after(now_ms, ttl)),
        }
    }

    /// An entry whose expiry is not in the future is logically absent.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(expires_at) if now_ms >= expires_at)
    }
}

fn expiry_after(now_ms: i64, ttl_secs: u64) -> i64 {
    now_ms.saturating_add((ttl_secs as i64).saturating_mul(1000))
}

/// Per-instance key-value map.
///
/// Expired entries are removed lazily when read and in bulk by
/// [`purge_expired`](Self::purge_expired), which the owning store runs on its
/// sweep interval. Every operation is atomic per key.
pub struct LocalFallbackStore {
    entries: DashMap<String, LocalEntry>,
    clock: SharedClock,
}

impl LocalFallbackStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.live_entry(key).map(|entry| entry.value)
    }

    /// Returns the live entry for `key`, purging it if it has expired.
    pub fn live_entry(&self, key: &str) -> Option<LocalEntry> {
        let now = self.clock.now_ms();
        let entry = self.entries.get(key)?;
        if !entry.is_expired(now) {
            return Some(entry.value().clone());
        }
        // Remove expired entry
        drop(entry);
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    pub fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        let now = self.clock.now_ms();
        self.entries
            .insert(key.to_string(), LocalEntry::new(value.to_string(), now, ttl_secs));
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.live_entry(key).is_some()
    }

    /// Increment the integer counter at `key`.
    ///
    /// A counter created by this call expires `ttl_secs` after creation. The
    /// expiry of a live counter is never refreshed, which makes the TTL a
    /// fixed window. A live key without an expiry picks up `ttl_secs`.
    pub fn increment(&self, key: &str, ttl_secs: Option<u64>) -> CacheResult<i64> {
        let now = self.clock.now_ms();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let entry = occupied.get_mut();
                let current: i64 = entry.value.parse().map_err(|_| CacheError::NotAnInteger {
                    key: key.to_string(),
                })?;
                let next = current.saturating_add(1);
                entry.value = next.to_string();
                if entry.expires_at_ms.is_none() {
                    entry.expires_at_ms = ttl_secs.map(|ttl| expiry_after(now, ttl));
                }
                Ok(next)
            }
            Entry::Occupied(mut expired) => {
                expired.insert(LocalEntry::new("1".to_string(), now, ttl_secs));
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LocalEntry::new("1".to_string(), now, ttl_secs));
                Ok(1)
            }
        }
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        crate::metrics::set_local_entries(self.entries.len());
        removed
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> (Arc<ManualClock>, LocalFallbackStore) {
        let clock = ManualClock::new(1_000_000);
        let store = LocalFallbackStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_set_and_get() {
        let (_, store) = store();
        store.set("pet:1", "rex", Some(60));
        assert_eq!(store.get("pet:1").as_deref(), Some("rex"));
        assert!(store.exists("pet:1"));
    }

    #[test]
    fn test_expired_entry_is_absent_and_purged_on_read() {
        let (clock, store) = store();
        store.set("pet:1", "rex", Some(5));

        clock.advance(Duration::from_millis(4_999));
        assert!(store.exists("pet:1"));

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("pet:1"), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let (clock, store) = store();
        store.set("pet:1", "rex", None);
        clock.advance(Duration::from_secs(86_400 * 365));
        assert!(store.exists("pet:1"));
    }

    #[test]
    fn test_delete() {
        let (_, store) = store();
        store.set("pet:1", "rex", Some(60));
        store.delete("pet:1");
        assert!(!store.exists("pet:1"));
    }

    #[test]
    fn test_increment_keeps_first_ttl() {
        let (clock, store) = store();
        assert_eq!(store.increment("hits", Some(60)).unwrap(), 1);
        let first_expiry = store.live_entry("hits").unwrap().expires_at_ms;

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.increment("hits", Some(600)).unwrap(), 2);
        assert_eq!(store.live_entry("hits").unwrap().expires_at_ms, first_expiry);

        clock.advance(Duration::from_secs(50));
        assert_eq!(store.increment("hits", Some(60)).unwrap(), 1);
    }

    #[test]
    fn test_increment_adopts_ttl_for_key_without_expiry() {
        let (clock, store) = store();
        store.set("hits", "4", None);
        assert_eq!(store.increment("hits", Some(30)).unwrap(), 5);
        assert_eq!(
            store.live_entry("hits").unwrap().expires_at_ms,
            Some(clock.now_ms() + 30_000)
        );
    }

    #[test]
    fn test_increment_non_integer_fails() {
        let (_, store) = store();
        store.set("name", "rex", None);
        let err = store.increment("name", Some(60)).unwrap_err();
        assert!(matches!(err, CacheError::NotAnInteger { .. }));
        assert_eq!(store.get("name").as_deref(), Some("rex"));
    }

    #[test]
    fn test_purge_expired() {
        let (clock, store) = store();
        store.set("short", "1", Some(1));
        store.set("long", "1", Some(120));
        store.set("forever", "1", None);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 2);
    }
}
