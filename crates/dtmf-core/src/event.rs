//! DTMF event types.

use std::time::Instant;

/// How a digit was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfMethod {
    Rfc2833,
    Inband,
    SipInfo,
}

impl DtmfMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DtmfMethod::Rfc2833 => "rfc2833",
            DtmfMethod::Inband => "inband",
            DtmfMethod::SipInfo => "sip_info",
        }
    }
}

/// One detected digit on one call.
#[derive(Debug, Clone)]
pub struct DtmfEvent {
    pub call_id: String,
    pub digit: char,
    pub method: DtmfMethod,
    pub timestamp: Instant,
    pub duration_ms: Option<u32>,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

impl DtmfEvent {
    /// Build an event for a digit carried over SIP INFO; the signaling
    /// plane is authoritative so confidence is 1.0.
    pub fn sip_info(call_id: impl Into<String>, digit: char) -> Self {
        Self {
            call_id: call_id.into(),
            digit,
            method: DtmfMethod::SipInfo,
            timestamp: Instant::now(),
            duration_ms: None,
            confidence: 1.0,
        }
    }
}

/// The sixteen digits of the DTMF keypad in event-code order (RFC 2833).
pub const DTMF_DIGITS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', '#', 'A', 'B', 'C', 'D',
];

/// Map an RFC 2833 event code to its digit.
pub fn digit_for_event_code(code: u8) -> Option<char> {
    DTMF_DIGITS.get(code as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_map_to_keypad() {
        assert_eq!(digit_for_event_code(0), Some('0'));
        assert_eq!(digit_for_event_code(9), Some('9'));
        assert_eq!(digit_for_event_code(10), Some('*'));
        assert_eq!(digit_for_event_code(11), Some('#'));
        assert_eq!(digit_for_event_code(15), Some('D'));
        assert_eq!(digit_for_event_code(16), None);
    }
}
