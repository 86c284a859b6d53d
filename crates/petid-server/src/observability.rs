//! Tracing setup.
//!
//! Logging starts at `info` before the configuration is read, then switches
//! to `logging.level` once it is known. `RUST_LOG` wins over both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

const STARTUP_LEVEL: &str = "info";

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

fn rust_log_filter() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Install the global subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = rust_log_filter().unwrap_or_else(|| EnvFilter::new(STARTUP_LEVEL));
    let (filter, handle) = reload::Layer::new(filter);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
    {
        let _ = FILTER.set(handle);
    }
}

/// Switch to the configured level unless `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = FILTER.get() else {
        return;
    };
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        tracing::warn!(level, error = %e, "Failed to apply logging level");
    }
}
