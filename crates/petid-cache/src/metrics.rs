//! Cache layer metrics.
//!
//! Uses the `metrics` facade; the server installs the Prometheus recorder.
//! Without a recorder these calls are no-ops.

use metrics::{Unit, counter, describe_counter, describe_gauge, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_BACKEND_ERRORS_TOTAL: &str = "cache_backend_errors_total";
    pub const CACHE_FALLBACK_TOTAL: &str = "cache_fallback_total";
    pub const CACHE_LOCAL_ENTRIES: &str = "cache_local_entries";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";
    pub const TOKEN_REVOCATIONS_TOTAL: &str = "token_revocations_total";
}

/// Register help text for every cache metric with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        names::CACHE_BACKEND_ERRORS_TOTAL,
        Unit::Count,
        "Failed calls against the distributed cache, by operation"
    );
    describe_counter!(
        names::CACHE_FALLBACK_TOTAL,
        Unit::Count,
        "Operations answered by the local store instead of the distributed cache"
    );
    describe_gauge!(
        names::CACHE_LOCAL_ENTRIES,
        Unit::Count,
        "Entries held by the local fallback store"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        Unit::Count,
        "Requests rejected by a rate-limit policy"
    );
    describe_counter!(
        names::TOKEN_REVOCATIONS_TOTAL,
        Unit::Count,
        "Tokens revoked through logout"
    );
}

/// Record a failed call against the distributed backend.
pub fn record_backend_error(op: &'static str) {
    counter!(names::CACHE_BACKEND_ERRORS_TOTAL, "op" => op).increment(1);
}

/// Record an operation served by the local store because the distributed
/// backend was unavailable.
pub fn record_fallback(op: &'static str) {
    counter!(names::CACHE_FALLBACK_TOTAL, "op" => op).increment(1);
}

pub fn set_local_entries(count: usize) {
    gauge!(names::CACHE_LOCAL_ENTRIES).set(count as f64);
}

pub fn record_rate_limit_rejection(policy: &'static str) {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "policy" => policy).increment(1);
}

pub fn record_revocation() {
    counter!(names::TOKEN_REVOCATIONS_TOTAL).increment(1);
}
