//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a finished download attempt
pub fn record_download(source: &'static str, success: bool) {
    metrics::counter!("comfy_deploy_downloads_total",
        "source" => source,
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record an identifier that matched no known format
pub fn record_unknown_identifier() {
    metrics::counter!("comfy_deploy_unknown_identifiers_total").increment(1);
}

/// Record a mirror action (created, replaced, skipped)
pub fn record_symlink(action: &'static str) {
    metrics::counter!("comfy_deploy_symlinks_total", "action" => action).increment(1);
}

/// Flip the readiness gauge for the web application
pub fn set_app_ready(ready: bool) {
    metrics::gauge!("comfy_deploy_app_ready").set(if ready { 1.0 } else { 0.0 });
}

/// Log the current metric values, for jobs that exit before anything scrapes them
pub fn log_snapshot(handle: &metrics_exporter_prometheus::PrometheusHandle) {
    tracing::info!(metrics = %handle.render(), "Metrics snapshot");
}
