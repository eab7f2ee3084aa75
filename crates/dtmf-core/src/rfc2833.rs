//! RFC 2833 telephony-event decoding.
//!
//! The payload is 4 bytes: event code, `E|R|volume`, and a 16-bit duration
//! in timestamp units. An event is emitted when the end bit arrives for a
//! call with a matching start. Duration comes from the wall clock between
//! start and end packets, falling back to the payload duration field when
//! the clock yields zero (packets replayed back-to-back).

use std::collections::HashMap;
use std::time::Instant;

use crate::event::{digit_for_event_code, DtmfEvent, DtmfMethod};

struct ActiveEvent {
    digit: char,
    started_at: Instant,
    duration_units: u16,
}

/// Per-call RFC 2833 state.
#[derive(Default)]
pub struct Rfc2833Decoder {
    active: HashMap<String, ActiveEvent>,
    malformed_dropped: u64,
}

impl Rfc2833Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one telephony-event payload; returns a completed digit event
    /// when the end bit closes an active digit.
    pub fn process_payload(
        &mut self,
        call_id: &str,
        payload: &[u8],
        now: Instant,
    ) -> Option<DtmfEvent> {
        if payload.len() < 4 {
            self.malformed_dropped += 1;
            tracing::debug!(call_id, len = payload.len(), "dropping short telephony-event payload");
            return None;
        }

        let event_code = payload[0];
        let flags = payload[1];
        let duration_units = u16::from_be_bytes([payload[2], payload[3]]);

        let digit = digit_for_event_code(event_code)?;
        let end_bit = flags & 0x80 != 0;

        match self.active.get_mut(call_id) {
            None => {
                // Start of a new event; wait for the end bit.
                self.active.insert(
                    call_id.to_string(),
                    ActiveEvent {
                        digit,
                        started_at: now,
                        duration_units,
                    },
                );
                None
            }
            Some(active) => {
                active.duration_units = active.duration_units.max(duration_units);

                if !end_bit {
                    return None;
                }

                let active = self.active.remove(call_id).expect("checked above");
                let wall_ms = now.duration_since(active.started_at).as_millis() as u32;
                let duration_ms = if wall_ms > 0 {
                    wall_ms
                } else {
                    // 8 kHz timestamp units.
                    active.duration_units as u32 / 8
                };

                Some(DtmfEvent {
                    call_id: call_id.to_string(),
                    digit: active.digit,
                    method: DtmfMethod::Rfc2833,
                    timestamp: now,
                    duration_ms: Some(duration_ms),
                    confidence: 0.95,
                })
            }
        }
    }

    /// Drop state for a finished call.
    pub fn cleanup_call(&mut self, call_id: &str) {
        self.active.remove(call_id);
    }

    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped
    }
}

/// Build a telephony-event payload; used by tests and the DTMF send path.
pub fn encode_event(event_code: u8, end: bool, duration_units: u16) -> [u8; 4] {
    let flags = if end { 0x80 } else { 0x00 };
    let duration = duration_units.to_be_bytes();
    [event_code, flags, duration[0], duration[1]]
}
