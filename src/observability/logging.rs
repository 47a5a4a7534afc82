//! # Structured Logging
//!
//! Initializes the global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured level; output is either JSON (default, one object per line)
//! or a human-readable pretty format for local work.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogFormat, LoggingConfig};
use crate::config_error;
use crate::core::error::GatewayResult;

/// Install the global subscriber.
///
/// Calling this twice is not an error; the second call logs a warning and keeps
/// the existing subscriber.
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| config_error!("Invalid log level '{}': {}", config.level, e))?,
    };

    let initialized = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(true))
            .try_init(),
    };

    if initialized.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(level = %config.level, format = ?config.format, "Structured logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "admission_gateway=loudest".to_string(),
            format: LogFormat::Json,
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_double_init_is_tolerated() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
