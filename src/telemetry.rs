//! Telemetry setup for dns-sync.
//!
//! Supports:
//! - Tracing with configurable log levels
//! - Prometheus metrics endpoint (with `prometheus` feature)

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
#[cfg(feature = "prometheus")]
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Initialize telemetry (tracing, optional metrics exporter).
pub fn init(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(config)?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        start_prometheus_exporter(addr)?;
    }

    #[cfg(not(feature = "prometheus"))]
    if config.prometheus_addr.is_some() {
        tracing::warn!("prometheus_addr is set but the prometheus feature is disabled");
    }

    Ok(())
}

fn init_tracing(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Start Prometheus metrics HTTP exporter.
#[cfg(feature = "prometheus")]
fn start_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!(%addr, "Prometheus metrics exporter started");

    Ok(())
}
