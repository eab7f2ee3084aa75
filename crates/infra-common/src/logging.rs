//! Logging for voxbridge processes.
//!
//! One process-wide `tracing` subscriber, configured with an env-filter
//! directive string so per-crate levels work out of the box
//! (`info,voxbridge=debug,voxbridge_rtp_core=warn`). `RUST_LOG` always
//! wins over the configured directives.
//!
//! Per-call context does not ride individual log fields; it rides spans.
//! [`call_span`] and [`sms_span`] are the two span shapes the bridge uses,
//! so every record emitted while handling a call or a message carries its
//! id without each call site repeating it.

use std::str::FromStr;

use tracing::Span;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::errors::{Error, Result};

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Default human-readable lines.
    Full,
    /// Condensed single-line output for dense call traffic.
    Compact,
    /// JSON records for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging settings. This is deliberately not part of `BridgeConfig`:
/// logging has to exist before any config file is read or validated.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Env-filter directives used when `RUST_LOG` is unset.
    pub directives: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            // The bridge crates log at debug during call setup; everything
            // else stays at info unless RUST_LOG says otherwise.
            directives: "info,voxbridge=debug".to_string(),
            format: LogFormat::Full,
        }
    }
}

impl LoggingConfig {
    pub fn new(directives: impl Into<String>, format: LogFormat) -> Self {
        LoggingConfig {
            directives: directives.into(),
            format,
        }
    }
}

/// Install the global subscriber. Fails if the directives do not parse or
/// a subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) => EnvFilter::try_new(env),
        Err(_) => EnvFilter::try_new(&config.directives),
    }
    .map_err(|e| Error::Logging(e.to_string()))?;

    let builder = fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| Error::Logging(e.to_string()))
}

/// Span for work done on behalf of one call. Everything the DTMF
/// dispatcher, IVR, and media path log inside it inherits the call id.
pub fn call_span(call_id: &str) -> Span {
    tracing::info_span!("call", %call_id)
}

/// Span for one SMS delivery attempt.
pub fn sms_span(message_id: &str) -> Span {
    tracing::info_span!("sms", %message_id)
}
