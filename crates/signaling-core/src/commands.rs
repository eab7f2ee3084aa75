//! Outbound commands to the signaling plane.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Transfer styles supported by the SIP plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Blind,
    Attended,
}

/// Outcome of a `send_message` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Commands the core issues back to the SIP plane.
///
/// Implementations talk to the actual proxy (RPC, WebSocket, whatever the
/// deployment uses); the core only depends on this trait.
#[async_trait]
pub trait SignalingCommands: Send + Sync {
    /// Terminate the call on the SIP side.
    async fn hangup(&self, call_id: &str) -> Result<()>;

    /// Transfer the call to a target number.
    async fn transfer(&self, call_id: &str, target: &str, mode: TransferMode) -> Result<()>;

    /// Ask the SIP side to play an audio asset to the caller.
    async fn play_audio(&self, call_id: &str, audio_ref: &str) -> Result<()>;

    /// Send a DTMF digit toward the caller.
    async fn dtmf_send(&self, call_id: &str, digit: &str) -> Result<()>;

    /// Send a SIP MESSAGE (SMS). Returns delivery acceptance, not final
    /// delivery.
    async fn send_message(
        &self,
        to_uri: &str,
        from_uri: &str,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> Result<SendResult>;
}
