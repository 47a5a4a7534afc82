//! # Admission Metrics
//!
//! Counters and histograms recorded through the `metrics` facade. Without an
//! installed recorder every call is a no-op, so recording is unconditional and
//! the Prometheus exporter is only installed when enabled in configuration.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::core::config::MetricsConfig;
use crate::core::error::{FailureKind, GatewayError, GatewayResult};
use crate::internal_error;

pub const ADMISSION_TOTAL: &str = "gateway_admission_total";
pub const ADMISSION_DENIALS_TOTAL: &str = "gateway_admission_denials_total";
pub const IDENTITY_LOOKUP_DURATION: &str = "gateway_identity_lookup_duration_seconds";

/// Handle for recording admission metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_exempt(&self) {
        counter!(ADMISSION_TOTAL, "outcome" => "exempt").increment(1);
    }

    pub fn record_allowed(&self) {
        counter!(ADMISSION_TOTAL, "outcome" => "allowed").increment(1);
    }

    pub fn record_denied(&self, kind: FailureKind) {
        counter!(ADMISSION_TOTAL, "outcome" => "denied").increment(1);
        counter!(ADMISSION_DENIALS_TOTAL, "kind" => kind.as_str()).increment(1);
    }

    pub fn record_identity_lookup(&self, elapsed: Duration) {
        histogram!(IDENTITY_LOOKUP_DURATION).record(elapsed.as_secs_f64());
    }
}

/// Install the Prometheus exporter if metrics are enabled.
///
/// Must be called from within a Tokio runtime.
pub fn install_prometheus_exporter(config: &MetricsConfig) -> GatewayResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config.listen_address.parse().map_err(|e| {
        GatewayError::config(format!(
            "Invalid metrics listen_address '{}': {}",
            config.listen_address, e
        ))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| internal_error!("Failed to install Prometheus exporter: {}", e))?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}
