//! AI bridge error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiBridgeError {
    /// All connect attempts were exhausted.
    #[error("AI platform unreachable after {attempts} attempts")]
    Unreachable { attempts: u32 },

    /// A write did not complete before the configured deadline.
    #[error("write to AI platform stalled past the deadline")]
    WriteStall,

    /// Token or signature construction failed.
    #[error("auth error: {0}")]
    Auth(String),

    /// No connection exists for the call.
    #[error("no AI connection for call {0}")]
    NotConnected(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AiBridgeError>;
