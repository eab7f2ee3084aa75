//! Call engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallEngineError {
    #[error("unknown call: {0}")]
    UnknownCall(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid routing rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },
}

pub type Result<T> = std::result::Result<T, CallEngineError>;
