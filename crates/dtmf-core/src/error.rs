//! DTMF subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DtmfError {
    #[error("invalid DTMF pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("unknown custom handler: {0}")]
    UnknownHandler(String),

    #[error("unknown IVR menu: {0}")]
    UnknownMenu(String),

    #[error("unknown music source: {0}")]
    UnknownSource(String),

    #[error("audio error: {0}")]
    Audio(#[from] voxbridge_audio_core::AudioError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DtmfError>;
