//! Error types for audio transforms.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    /// PCM buffers must hold whole 16-bit samples.
    #[error("PCM buffer length {0} is not a multiple of 2")]
    OddPcmLength(usize),

    /// Sample rates must be non-zero.
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    /// A WAV container failed validation.
    #[error("invalid WAV data: {0}")]
    InvalidWav(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;
