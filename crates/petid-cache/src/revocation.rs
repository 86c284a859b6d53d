//! Token revocation registry for JWT logout.
//!
//! A revoked token stays revoked until its natural expiry and is then
//! forgotten, so the set of tracked revocations never outgrows the tokens
//! issued within one maximum token lifetime.
//!
//! ## Two Stores
//!
//! `revoke` writes `token:blacklist:<fingerprint>` to the [`KeyValueStore`]
//! (and so to the distributed backend when it is up) and always records the
//! token in a local index with its exact expiry.
//!
//! - [`is_revoked`](RevocationRegistry::is_revoked) asks the distributed
//!   backend first, then the local index.
//! - [`is_revoked_sync`](RevocationRegistry::is_revoked_sync) only ever reads
//!   the local index. A revocation made on another instance is invisible to
//!   it, so its staleness equals the distributed propagation delay.
//!
//! When neither store knows the token, it is treated as not revoked.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::store::{DEFAULT_SWEEP_INTERVAL, KeyValueStore};
use crate::sweeper::Sweeper;

/// Key namespace of revoked tokens in the key-value store.
pub const BLACKLIST_PREFIX: &str = "token:blacklist:";

/// SHA-256 hex fingerprint of a token. Raw tokens are never stored.
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn purge_index(index: &DashMap<String, i64>, now_ms: i64) -> usize {
    let before = index.len();
    index.retain(|_, expires_at| now_ms < *expires_at);
    before.saturating_sub(index.len())
}

pub struct RevocationRegistry {
    store: Arc<KeyValueStore>,
    /// Fingerprint -> natural expiry in epoch millis.
    index: Arc<DashMap<String, i64>>,
    sweeper: Sweeper,
}

impl RevocationRegistry {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self::with_sweep_interval(store, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(store: Arc<KeyValueStore>, sweep_interval: Duration) -> Self {
        Self {
            store,
            index: Arc::new(DashMap::new()),
            sweeper: Sweeper::new("revocation", sweep_interval),
        }
    }

    /// Start purging expired revocations from the local index.
    pub fn start(&self) {
        let index = Arc::clone(&self.index);
        let clock = Arc::clone(self.store.clock());
        self.sweeper.start(move || purge_index(&index, clock.now_ms()));
    }

    pub fn stop(&self) {
        self.sweeper.stop();
    }

    fn key(fingerprint: &str) -> String {
        format!("{BLACKLIST_PREFIX}{fingerprint}")
    }

    /// Revoke `token` until `expires_at_ms`, its natural expiry.
    ///
    /// Never fails: if the distributed write is lost, the local index still
    /// makes this instance reject the token. Revoking twice is harmless.
    pub async fn revoke(&self, token: &str, expires_at_ms: i64) {
        let fingerprint = token_fingerprint(token);
        let now = self.store.clock().now_ms();
        let ttl_secs = expires_at_ms.saturating_sub(now).div_euclid(1000).max(1) as u64;

        // The sync path never consults the distributed backend, so the local
        // index is written even when the store write reaches it.
        self.index.insert(fingerprint.clone(), expires_at_ms);
        self.store
            .set(&Self::key(&fingerprint), "1", Some(ttl_secs))
            .await;

        crate::metrics::record_revocation();
        tracing::debug!(token = %&fingerprint[..12], ttl_secs, "token revoked");
    }

    /// Check the distributed backend, then the local index.
    pub async fn is_revoked(&self, token: &str) -> bool {
        let fingerprint = token_fingerprint(token);
        if self
            .store
            .distributed_exists(&Self::key(&fingerprint))
            .await
            .unwrap_or(false)
        {
            return true;
        }
        self.check_local(&fingerprint)
    }

    /// Check the local index only. See the module docs for its staleness.
    pub fn is_revoked_sync(&self, token: &str) -> bool {
        self.check_local(&token_fingerprint(token))
    }

    fn check_local(&self, fingerprint: &str) -> bool {
        let now = self.store.clock().now_ms();
        let Some(expires_at) = self.index.get(fingerprint).map(|e| *e) else {
            return false;
        };
        if now < expires_at {
            return true;
        }
        self.index.remove_if(fingerprint, |_, expires_at| now >= *expires_at);
        false
    }

    /// Remove every revocation past its natural expiry from the local index.
    pub fn purge_expired(&self) -> usize {
        purge_index(&self.index, self.store.clock().now_ms())
    }

    /// Number of revocations tracked locally.
    pub fn tracked(&self) -> usize {
        self.index.len()
    }
}
