//! Wire frames exchanged with the AI platform.
//!
//! Every frame is a JSON object with a `type` field. Audio rides in
//! `audio_data` frames as base64 of raw 16-bit little-endian PCM. Control
//! frames from the AI are tolerant of both `{type, data: {...}}` and flat
//! `{type, ...}` shapes.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use serde_json::{json, Value};

/// The `call` section of the auth frame.
#[derive(Debug, Clone, Serialize)]
pub struct CallSection {
    pub conversation_id: String,
    pub from_number: String,
    pub to_number: String,
    pub direction: String,
    pub sip_headers: HashMap<String, String>,
    pub codec: String,
    pub sample_rate: u32,
}

/// Build the first frame of every session.
pub fn auth_frame(
    token: &str,
    signature: &str,
    timestamp: u64,
    call_id: &str,
    call: &CallSection,
) -> Value {
    json!({
        "type": "auth",
        "auth": {
            "token": format!("Bearer {token}"),
            "signature": signature,
            "timestamp": timestamp.to_string(),
            "call_id": call_id,
        },
        "call": call,
    })
}

/// Build an outbound audio frame.
pub fn audio_frame(call_id: &str, pcm: &[u8], timestamp: f64, sequence: u16) -> Value {
    json!({
        "type": "audio_data",
        "data": {
            "call_id": call_id,
            "audio": BASE64.encode(pcm),
            "timestamp": timestamp,
            "sequence": sequence,
        }
    })
}

/// Build the terminating frame.
pub fn call_end_frame(call_id: &str, reason: &str, timestamp: f64) -> Value {
    json!({
        "type": "call_end",
        "data": {
            "call_id": call_id,
            "reason": reason,
            "timestamp": timestamp,
        }
    })
}

/// Build an error report frame.
pub fn error_frame(call_id: &str, code: &str, message: &str) -> Value {
    json!({
        "type": "error",
        "data": {
            "call_id": call_id,
            "code": code,
            "message": message,
        }
    })
}

/// Everything the AI can ask of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum AiControl {
    /// Decoded PCM from an `audio_data` frame.
    Audio(Vec<u8>),
    Hangup,
    Transfer { target: String },
    Hold,
    Resume,
    DtmfSend { digit: String },
    Error { code: String, message: String },
    /// Recognized JSON with an unhandled `type`.
    Other(String),
}

/// Parse an inbound text frame. Returns `None` for unusable JSON.
pub fn parse_inbound(text: &str) -> Option<AiControl> {
    let value: Value = serde_json::from_str(text).ok()?;
    let frame_type = value.get("type")?.as_str()?;

    // Parameters may live under "data" or at the top level.
    let params = value.get("data").unwrap_or(&value);

    let control = match frame_type {
        "audio_data" => {
            let encoded = params.get("audio")?.as_str()?;
            let pcm = BASE64.decode(encoded).ok()?;
            AiControl::Audio(pcm)
        }
        "hangup" => AiControl::Hangup,
        "transfer" => AiControl::Transfer {
            target: params.get("target")?.as_str()?.to_string(),
        },
        "hold" => AiControl::Hold,
        "resume" => AiControl::Resume,
        "dtmf_send" => AiControl::DtmfSend {
            digit: params.get("digit")?.as_str()?.to_string(),
        },
        "error" => AiControl::Error {
            code: params
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            message: params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        other => AiControl::Other(other.to_string()),
    };
    Some(control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_base64_roundtrips() {
        let pcm: Vec<u8> = (0..=255).collect();
        let frame = audio_frame("c1", &pcm, 1.5, 42);
        assert_eq!(frame["type"], "audio_data");
        assert_eq!(frame["data"]["sequence"], 42);

        let decoded = BASE64
            .decode(frame["data"]["audio"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn auth_frame_shape() {
        let call = CallSection {
            conversation_id: "c1".into(),
            from_number: "+1".into(),
            to_number: "+2".into(),
            direction: "inbound".into(),
            sip_headers: HashMap::new(),
            codec: "PCMU".into(),
            sample_rate: 8000,
        };
        let frame = auth_frame("tok", "sig", 1_700_000_000, "c1", &call);
        assert_eq!(frame["type"], "auth");
        assert_eq!(frame["auth"]["token"], "Bearer tok");
        assert_eq!(frame["auth"]["timestamp"], "1700000000");
        assert_eq!(frame["call"]["from_number"], "+1");
        assert_eq!(frame["call"]["sample_rate"], 8000);
    }

    #[test]
    fn inbound_controls_parse_both_shapes() {
        assert_eq!(
            parse_inbound(r#"{"type": "transfer", "data": {"target": "+1555"}}"#),
            Some(AiControl::Transfer {
                target: "+1555".into()
            })
        );
        assert_eq!(
            parse_inbound(r#"{"type": "transfer", "target": "+1555"}"#),
            Some(AiControl::Transfer {
                target: "+1555".into()
            })
        );
        assert_eq!(parse_inbound(r#"{"type": "hangup"}"#), Some(AiControl::Hangup));
        assert_eq!(
            parse_inbound(r#"{"type": "dtmf_send", "data": {"digit": "5"}}"#),
            Some(AiControl::DtmfSend { digit: "5".into() })
        );
    }

    #[test]
    fn inbound_audio_decodes() {
        let encoded = BASE64.encode([1u8, 2, 3, 4]);
        let text = format!(r#"{{"type": "audio_data", "data": {{"audio": "{encoded}"}}}}"#);
        assert_eq!(
            parse_inbound(&text),
            Some(AiControl::Audio(vec![1, 2, 3, 4]))
        );
    }

    #[test]
    fn junk_is_rejected_and_unknown_is_other() {
        assert!(parse_inbound("not json").is_none());
        assert!(parse_inbound(r#"{"no_type": true}"#).is_none());
        assert_eq!(
            parse_inbound(r#"{"type": "weather_report"}"#),
            Some(AiControl::Other("weather_report".into()))
        );
    }
}
