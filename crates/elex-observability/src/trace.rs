//! Structured log initialisation

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{ObservabilityConfig, ObservabilityError};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Human-readable multi-line output
    #[default]
    Pretty,
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Calling this twice
/// returns [`ObservabilityError::TracingInit`].
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .map_err(|e| ObservabilityError::Config(format!("invalid log filter: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    installed.map_err(|e| ObservabilityError::TracingInit(e.to_string()))?;

    tracing::info!(
        namespace = %config.namespace,
        format = ?config.log_format,
        "Initialized structured tracing"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = ObservabilityConfig {
            log_filter: "elex=loudest".to_string(),
            ..Default::default()
        };
        // RUST_LOG may be set in CI, in which case the filter is never parsed
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                init_tracing(&config),
                Err(ObservabilityError::Config(_))
            ));
        }
    }

    #[test]
    fn test_second_initialisation_is_an_error() {
        let config = ObservabilityConfig {
            log_format: LogFormat::Json,
            ..Default::default()
        };
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        // The first call may lose to another test installing a subscriber
        let _ = first;
        assert!(matches!(second, Err(ObservabilityError::TracingInit(_))));
    }

    #[test]
    fn test_log_format_parsing() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
