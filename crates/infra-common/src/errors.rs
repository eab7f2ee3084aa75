//! Error types shared by the infrastructure layer.

use thiserror::Error;

/// Errors produced by the infrastructure crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An event handler reported a failure.
    #[error("event handler '{handler}' failed for '{event}': {message}")]
    Handler {
        handler: String,
        event: String,
        message: String,
    },

    /// The logging subsystem could not be initialized.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Result alias for infrastructure operations.
pub type Result<T> = std::result::Result<T, Error>;
