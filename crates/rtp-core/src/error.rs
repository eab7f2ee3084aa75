//! RTP error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtpError {
    /// Packet shorter than the structure it claims to carry.
    #[error("RTP packet too short: {0} bytes")]
    PacketTooShort(usize),

    /// Version field was not 2.
    #[error("unsupported RTP version: {0}")]
    UnsupportedVersion(u8),

    /// The configured port range is exhausted.
    #[error("no available RTP ports in range {0}-{1}")]
    PortsExhausted(u16, u16),

    /// Socket-level failure.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// The session was already stopped.
    #[error("RTP session on port {0} is not running")]
    SessionStopped(u16),
}

pub type Result<T> = std::result::Result<T, RtpError>;
