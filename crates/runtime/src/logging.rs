//! Structured logging setup
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level so operators can raise verbosity for one module without
//! editing `kiln.toml`.

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LogFormat, LoggingConfig};

/// Initialise the global tracing subscriber.
///
/// Returns an error if a subscriber has already been installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::InvalidValue {
            key: "logging.level".to_string(),
            reason: e.to_string(),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    result.map_err(|e| ConfigError::InvalidValue {
        key: "logging".to_string(),
        reason: format!("Failed to install subscriber: {}", e),
    })
}
