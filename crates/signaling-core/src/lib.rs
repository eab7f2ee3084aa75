//! Signaling-plane adapter types.
//!
//! The SIP proxy/registrar lives outside this process; it reports what is
//! happening on the wire as [`SignalingEvent`]s and accepts the commands in
//! [`SignalingCommands`]. This crate defines only that boundary; the bridge
//! crate does the translation to core operations.

pub mod commands;
pub mod events;
pub mod uri;

pub use commands::{SendResult, SignalingCommands, TransferMode};
pub use events::SignalingEvent;
pub use uri::extract_number;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed signaling event: {0}")]
    Malformed(String),

    #[error("signaling command failed: {0}")]
    CommandFailed(String),
}

pub type Result<T> = std::result::Result<T, SignalingError>;
