//! Telemetry module
//!
//! Structured logging and the Prometheus metrics exporter.

mod logging;

pub use logging::init_logging;

use crate::config::TelemetrySection;
use std::net::{Ipv4Addr, SocketAddr};

/// Initialize logging and the metrics endpoint.
///
/// Must run inside the tokio runtime (the exporter spawns its HTTP task).
pub fn init_telemetry(config: &TelemetrySection) -> anyhow::Result<()> {
    init_logging(&config.log_level)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.metrics_port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to start metrics exporter: {}", e))?;

    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}
