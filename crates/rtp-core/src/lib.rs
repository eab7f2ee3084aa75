//! RTP media transport for voxbridge.
//!
//! One [`session::RtpSession`] per call owns a UDP socket, a receive loop
//! feeding the [`jitter::JitterBuffer`], and a 20 ms playout loop that hands
//! in-order payloads to the media pipeline. [`manager::RtpManager`]
//! multiplexes sessions and owns the even-only port pool.

pub mod error;
pub mod jitter;
pub mod manager;
pub mod packet;
pub mod playout;
pub mod session;
pub mod stats;

pub use error::{Result, RtpError};
pub use jitter::{JitterBuffer, JitterBufferConfig};
pub use manager::{RtpManager, RtpPortPool};
pub use packet::{payload_type_for_codec, RtpHeader, RtpPacket};
pub use playout::AudioBuffer;
pub use session::{PayloadSink, RtpSession, RtpSessionConfig};
pub use stats::RtpStatistics;
