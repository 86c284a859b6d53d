//! Fixed-window rate limiting on top of [`KeyValueStore::increment`].
//!
//! Each policy owns a key prefix, a window length and an inclusive ceiling.
//! The first request from a client creates a counter whose TTL is the window;
//! every request, admitted or not, increments that counter exactly once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::timestamp_from_ms;
use crate::store::KeyValueStore;

/// Key namespace shared by all rate-limit counters.
pub const RATE_LIMIT_PREFIX: &str = "ratelimit:";

/// Route classes with their own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Standard,
    Auth,
    Upload,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [Self::Standard, Self::Auth, Self::Upload];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Auth => "auth",
            Self::Upload => "upload",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub kind: PolicyKind,
    pub key_prefix: String,
    pub window: Duration,
    /// Inclusive ceiling: the request that reaches it is still admitted.
    pub max_requests: u64,
    /// Text returned to clients on rejection.
    pub message: String,
}

impl RateLimitPolicy {
    /// Default policy for a route class.
    ///
    /// | policy   | window | max requests |
    /// |----------|--------|--------------|
    /// | standard | 60 s   | 100          |
    /// | auth     | 60 s   | 10           |
    /// | upload   | 60 s   | 20           |
    #[must_use]
    pub fn default_for(kind: PolicyKind) -> Self {
        let (max_requests, message) = match kind {
            PolicyKind::Standard => (100, "Too many requests, please try again later."),
            PolicyKind::Auth => (
                10,
                "Too many authentication attempts, please try again later.",
            ),
            PolicyKind::Upload => (20, "Too many uploads, please try again later."),
        };
        Self {
            kind,
            key_prefix: kind.as_str().to_string(),
            window: Duration::from_secs(60),
            max_requests,
            message: message.to_string(),
        }
    }

    /// Window length in whole seconds, never less than one.
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// Outcome of a single [`RateLimiter::admit`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Counter value after this request; `0` when the counter could not be
    /// read and the request was admitted anyway.
    pub total_hits: u64,
    pub limit: u64,
    /// Approximate end of the window: the check time plus the window length.
    pub reset_at: OffsetDateTime,
}

impl Admission {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.total_hits)
    }
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<KeyValueStore>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, store: Arc<KeyValueStore>) -> Self {
        Self { policy, store }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn key(&self, client: &str) -> String {
        format!("{RATE_LIMIT_PREFIX}{}:{client}", self.policy.key_prefix)
    }

    /// Count a request from `client` and decide whether it is admitted.
    ///
    /// If the counter cannot be incremented even locally, the request is
    /// admitted rather than failing the request pipeline.
    pub async fn admit(&self, client: &str) -> Admission {
        let key = self.key(client);
        let now_ms = self.store.clock().now_ms();
        let reset_at =
            timestamp_from_ms(now_ms.saturating_add(self.policy.window.as_millis() as i64));

        let total_hits = match self
            .store
            .increment(&key, Some(self.policy.window_secs()))
            .await
        {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                tracing::error!(
                    policy = %self.policy.kind,
                    key = %key,
                    error = %e,
                    "Rate limit counter unavailable, admitting request"
                );
                return Admission {
                    allowed: true,
                    total_hits: 0,
                    limit: self.policy.max_requests,
                    reset_at,
                };
            }
        };

        let allowed = total_hits <= self.policy.max_requests;
        if !allowed {
            crate::metrics::record_rate_limit_rejection(self.policy.kind.as_str());
            tracing::debug!(
                policy = %self.policy.kind,
                client = %client,
                total_hits,
                "rate limit exceeded"
            );
        }

        Admission {
            allowed,
            total_hits,
            limit: self.policy.max_requests,
            reset_at,
        }
    }
}

/// One [`RateLimiter`] per route class, sharing a single store.
pub struct RateLimiters {
    standard: RateLimiter,
    auth: RateLimiter,
    upload: RateLimiter,
}

impl RateLimiters {
    /// Build limiters from a policy lookup.
    pub fn new(store: Arc<KeyValueStore>, policy: impl Fn(PolicyKind) -> RateLimitPolicy) -> Self {
        Self {
            standard: RateLimiter::new(policy(PolicyKind::Standard), Arc::clone(&store)),
            auth: RateLimiter::new(policy(PolicyKind::Auth), Arc::clone(&store)),
            upload: RateLimiter::new(policy(PolicyKind::Upload), store),
        }
    }

    pub fn with_defaults(store: Arc<KeyValueStore>) -> Self {
        Self::new(store, RateLimitPolicy::default_for)
    }

    pub fn get(&self, kind: PolicyKind) -> &RateLimiter {
        match kind {
            PolicyKind::Standard => &self.standard,
            PolicyKind::Auth => &self.auth,
            PolicyKind::Upload => &self.upload,
        }
    }

    pub async fn admit(&self, kind: PolicyKind, client: &str) -> Admission {
        self.get(kind).admit(client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn limiters() -> (Arc<ManualClock>, Arc<KeyValueStore>, RateLimiters) {
        let clock = ManualClock::new(1_700_000_000_000);
        let store = Arc::new(KeyValueStore::local_only(clock.clone()));
        let limiters = RateLimiters::with_defaults(Arc::clone(&store));
        (clock, store, limiters)
    }

    #[tokio::test]
    async fn test_auth_policy_admits_ten_then_rejects() {
        let (_, _, limiters) = limiters();

        for i in 1..=10 {
            let admission = limiters.admit(PolicyKind::Auth, "1.2.3.4").await;
            assert!(admission.allowed, "request {i} should be admitted");
            assert_eq!(admission.total_hits, i);
        }

        let eleventh = limiters.admit(PolicyKind::Auth, "1.2.3.4").await;
        assert!(!eleventh.allowed);
        assert_eq!(eleventh.total_hits, 11);
        assert_eq!(eleventh.remaining(), 0);
    }

    #[tokio::test]
    async fn test_new_window_after_reset() {
        let (clock, _, limiters) = limiters();

        let mut last = None;
        for _ in 0..11 {
            last = Some(limiters.admit(PolicyKind::Auth, "1.2.3.4").await);
        }
        let rejected = last.unwrap();
        assert!(!rejected.allowed);

        clock.set(
            (rejected.reset_at.unix_timestamp_nanos() / 1_000_000) as i64,
        );
        let fresh = limiters.admit(PolicyKind::Auth, "1.2.3.4").await;
        assert!(fresh.allowed);
        assert_eq!(fresh.total_hits, 1);
    }

    #[tokio::test]
    async fn test_reset_at_is_now_plus_window() {
        let (clock, _, limiters) = limiters();
        let admission = limiters.admit(PolicyKind::Standard, "client").await;
        let reset_ms = (admission.reset_at.unix_timestamp_nanos() / 1_000_000) as i64;
        assert_eq!(reset_ms, clock.now_ms() + 60_000);
    }

    #[tokio::test]
    async fn test_policies_and_clients_are_independent() {
        let (_, _, limiters) = limiters();

        for _ in 0..10 {
            limiters.admit(PolicyKind::Auth, "1.2.3.4").await;
        }
        assert!(!limiters.admit(PolicyKind::Auth, "1.2.3.4").await.allowed);
        assert!(limiters.admit(PolicyKind::Auth, "5.6.7.8").await.allowed);

        let standard = limiters.admit(PolicyKind::Standard, "1.2.3.4").await;
        assert!(standard.allowed);
        assert_eq!(standard.total_hits, 1);
    }

    #[tokio::test]
    async fn test_counter_failure_fails_open() {
        let (_, store, limiters) = limiters();
        let key = limiters.get(PolicyKind::Upload).key("10.0.0.1");
        store.set(&key, "not-a-number", Some(60)).await;

        let admission = limiters.admit(PolicyKind::Upload, "10.0.0.1").await;
        assert!(admission.allowed);
        assert_eq!(admission.total_hits, 0);
    }

    #[test]
    fn test_key_layout() {
        let store = Arc::new(KeyValueStore::local_only(ManualClock::new(0)));
        let limiter = RateLimiter::new(RateLimitPolicy::default_for(PolicyKind::Upload), store);
        assert_eq!(limiter.key("1.2.3.4"), "ratelimit:upload:1.2.3.4");
    }

    #[test]
    fn test_default_policies() {
        let auth = RateLimitPolicy::default_for(PolicyKind::Auth);
        assert_eq!(auth.window, Duration::from_secs(60));
        assert_eq!(auth.max_requests, 10);
        assert_eq!(RateLimitPolicy::default_for(PolicyKind::Standard).max_requests, 100);
        assert_eq!(RateLimitPolicy::default_for(PolicyKind::Upload).max_requests, 20);
    }
}
