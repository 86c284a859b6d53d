//! Prometheus exporter for the metrics recorded by `petid-cache`.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe the cache metrics.
///
/// Only the first call installs anything; later calls return `false`.
/// `/metrics` is pulled through the router, so no listener is started.
pub fn init_metrics() -> bool {
    if PROMETHEUS.get().is_some() {
        return false;
    }

    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            return false;
        }
    };
    if PROMETHEUS.set(handle).is_err() {
        return false;
    }

    petid_cache::metrics::describe_metrics();
    tracing::info!("Prometheus metrics enabled at /metrics");
    true
}

/// Prometheus text exposition, or `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}
