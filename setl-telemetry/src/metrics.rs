//! Metrics recorder bootstrap.

use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Interval between upkeep passes over the installed recorder.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// Global cache for the Prometheus handle used by [`init_metrics`].
//
// A `Mutex<Option<_>>` is used instead of `Once` because installation is
// fallible. Installing a recorder twice fails, and tests initialize metrics
// repeatedly, so later calls must return the cached handle.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the global Prometheus metrics recorder and returns a render handle.
///
/// The caller decides how to expose the rendered output; no HTTP listener is
/// started here. Subsequent calls return the already-installed handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE.lock().unwrap();

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    let upkeep_handle = handle.clone();

    // Periodic upkeep bounds the memory held by idle histograms.
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}
