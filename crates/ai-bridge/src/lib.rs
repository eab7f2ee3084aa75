//! AI platform bridge.
//!
//! One outbound WebSocket per call. The first frame authenticates the
//! session (bearer JWT plus an HMAC-SHA256 request signature); afterwards
//! audio flows as base64 PCM `audio_data` frames and control flows as
//! typed JSON frames. Connects retry with exponential backoff, a 30 s
//! heartbeat guards liveness, and a stalled write fails the call rather
//! than queueing unboundedly.

pub mod auth;
pub mod connection;
pub mod error;
pub mod protocol;

pub use auth::{build_token, sign_request, AuthClaims};
pub use connection::{AiBridgeConfig, AiConnectionManager, AiFrameHandler, CallInfo};
pub use error::{AiBridgeError, Result};
pub use protocol::{parse_inbound, AiControl};
