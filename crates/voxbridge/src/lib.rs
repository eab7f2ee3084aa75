//! voxbridge — a real-time voice bridge between a SIP signaling plane and
//! a conversational AI platform.
//!
//! The [`Bridge`] ties the workspace together: signaling events become call
//! sessions, each accepted call gets an RTP session, a jitter-controlled
//! media path, and an authenticated WebSocket to the AI; DTMF flows through
//! detectors into the pattern processor and the IVR engine; SMS rides SIP
//! MESSAGE with queueing and retry.

pub mod bridge;

pub use bridge::{Bridge, BridgeStats};

pub use voxbridge_ai_bridge as ai_bridge;
pub use voxbridge_audio_core as audio_core;
pub use voxbridge_call_engine as call_engine;
pub use voxbridge_dtmf_core as dtmf_core;
pub use voxbridge_infra_common as infra;
pub use voxbridge_rtp_core as rtp_core;
pub use voxbridge_signaling_core as signaling;
pub use voxbridge_sms_core as sms_core;
