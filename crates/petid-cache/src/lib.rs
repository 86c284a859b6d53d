//! Distributed cache, rate limiting and token revocation for PetID.
//!
//! ## Architecture
//!
//! ```text
//! RateLimiter ──┐
//!               ├──► KeyValueStore ──► DegradingProxy ──► DistributedBackend (Redis)
//! Revocation ───┘          │
//!  Registry ─► local index └──────────► LocalFallbackStore (DashMap)
//! ```
//!
//! ## Graceful Degradation
//!
//! The distributed backend is optional. When it is disabled, unreachable or
//! failing, every operation is served by the local store. The layer fails
//! open: rate limits become per-instance and revocations made elsewhere may
//! go unseen, but no request is rejected because the cache is down.

pub mod backend;
pub mod clock;
pub mod error;
pub mod local;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod revocation;
pub mod store;
pub mod sweeper;

pub use backend::{DistributedBackend, RedisBackend, RedisSettings};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CacheError, CacheResult};
pub use local::{LocalEntry, LocalFallbackStore};
pub use rate_limit::{Admission, PolicyKind, RateLimitPolicy, RateLimiter, RateLimiters};
pub use revocation::{RevocationRegistry, token_fingerprint};
pub use store::{BackendKind, KeyValueStore, StoreHealth, StoreOptions};
