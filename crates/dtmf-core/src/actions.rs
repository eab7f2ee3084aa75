//! Capability traits handed to DTMF-driven subsystems.
//!
//! Subsystems never hold a session reference; they get a `call_id` and this
//! narrow interface back to the call manager and media plane.

use async_trait::async_trait;
use serde_json::Value;

/// Operations a pattern action or IVR action may invoke on a call.
#[async_trait]
pub trait CallActions: Send + Sync {
    /// Ship a JSON frame to the AI session of this call.
    async fn forward_to_ai(&self, call_id: &str, frame: Value) -> bool;

    /// Blind-transfer the call.
    async fn transfer_call(&self, call_id: &str, target: &str) -> bool;

    /// Play an audio asset to the caller.
    async fn play_audio(&self, call_id: &str, audio_ref: &str) -> bool;

    /// Terminate the call.
    async fn hangup_call(&self, call_id: &str, reason: &str) -> bool;

    /// Flip the recording flag.
    async fn toggle_recording(&self, call_id: &str) -> bool;

    /// Move the call into an IVR menu.
    async fn enter_ivr(&self, call_id: &str, menu_id: &str) -> bool;
}

/// Sink for locally generated audio (hold music, IVR prompts).
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Deliver one PCM chunk to the call's media path. Returns false when
    /// the call can no longer accept audio.
    async fn send_audio(&self, call_id: &str, pcm: &[u8]) -> bool;
}
