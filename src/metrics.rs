//! Prometheus exposition for the `metrics` facade counters

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder
///
/// Safe to call more than once; later calls return the first handle. Returns
/// `None` if another recorder was installed first.
pub fn install_recorder() -> Option<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Some(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(METRICS_HANDLE.get_or_init(|| handle).clone()),
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder");
            METRICS_HANDLE.get().cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        let first = install_recorder();
        let second = install_recorder();
        assert_eq!(first.is_some(), second.is_some());

        if let Some(handle) = second {
            telemetry_metrics::counter!("pricewatch_test_total").increment(1);
            assert!(handle.render().contains("pricewatch_test_total"));
        }
    }
}
