//! Logging setup
//!
//! Installs a `tracing-subscriber` registry with:
//! - an `EnvFilter` (`RUST_LOG` wins, otherwise the configured level)
//! - a fmt layer, human-readable or JSON

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Build the filter from `RUST_LOG`, falling back to `level`
pub fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter(e.to_string())),
    }
}

/// Install the global subscriber
///
/// `level_override` (the CLI flag) takes precedence over the config file.
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<(), LoggingError> {
    let env_filter = env_filter(level_override.unwrap_or(&config.level))?;

    if config.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true);

        let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true);

        let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_filter_falls_back_to_level() {
        std::env::remove_var("RUST_LOG");
        assert!(env_filter("debug").is_ok());
        assert!(env_filter("course_video_uploadr=trace,warn").is_ok());
    }

    #[test]
    #[serial]
    fn test_env_filter_rejects_garbage() {
        std::env::remove_var("RUST_LOG");
        assert!(matches!(
            env_filter("[[not a filter"),
            Err(LoggingError::InvalidFilter(_))
        ));
    }

    #[test]
    #[serial]
    fn test_init_twice_reports_error() {
        let config = LoggingConfig::default();
        // The first call may already fail if another test installed a subscriber
        let _ = init_logging(&config, None);
        assert!(init_logging(&config, Some("warn")).is_err());
    }
}
