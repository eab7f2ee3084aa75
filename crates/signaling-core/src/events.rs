//! Inbound events from the signaling plane.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Everything the SIP plane can tell the core, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingEvent {
    /// A new call has arrived (or an outbound call was placed).
    CallStart {
        call_id: String,
        from_number: String,
        to_number: String,
        #[serde(default)]
        sip_headers: HashMap<String, String>,
        #[serde(default)]
        codec: Option<String>,
        #[serde(default)]
        remote_rtp_host: Option<String>,
        #[serde(default)]
        remote_rtp_port: Option<u16>,
    },
    /// The callee answered.
    CallAnswer { call_id: String },
    /// The call ended on the SIP side.
    CallEnd {
        call_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Hold requested from the SIP side.
    CallHold { call_id: String },
    /// Resume requested from the SIP side.
    CallResume { call_id: String },
    /// DTMF digit reported via SIP INFO.
    DtmfInfo { call_id: String, digit: String },
    /// RTP relayed through the adapter instead of arriving on our socket.
    RtpPacket {
        call_id: String,
        /// Raw packet bytes, base64 on the wire.
        data: String,
    },
    /// A SIP MESSAGE carrying SMS content.
    SmsMessage {
        from_uri: String,
        to_uri: String,
        body: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        call_id: Option<String>,
    },
}

impl SignalingEvent {
    /// The call this event belongs to, when it names one.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            SignalingEvent::CallStart { call_id, .. }
            | SignalingEvent::CallAnswer { call_id }
            | SignalingEvent::CallEnd { call_id, .. }
            | SignalingEvent::CallHold { call_id }
            | SignalingEvent::CallResume { call_id }
            | SignalingEvent::DtmfInfo { call_id, .. }
            | SignalingEvent::RtpPacket { call_id, .. } => Some(call_id),
            SignalingEvent::SmsMessage { call_id, .. } => call_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_start_deserializes_with_defaults() {
        let event: SignalingEvent = serde_json::from_str(
            r#"{"type": "call_start", "call_id": "c1", "from_number": "+1", "to_number": "+2"}"#,
        )
        .unwrap();

        match event {
            SignalingEvent::CallStart {
                call_id,
                codec,
                remote_rtp_port,
                ..
            } => {
                assert_eq!(call_id, "c1");
                assert!(codec.is_none());
                assert!(remote_rtp_port.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn dtmf_info_roundtrips() {
        let event = SignalingEvent::DtmfInfo {
            call_id: "c9".into(),
            digit: "#".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"dtmf_info""#));
        let back: SignalingEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_id(), Some("c9"));
    }
}
