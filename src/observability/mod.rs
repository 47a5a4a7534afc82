// Structured logging
pub mod logging;

// Admission counters and the Prometheus exporter
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{install_prometheus_exporter, AdmissionMetrics};
