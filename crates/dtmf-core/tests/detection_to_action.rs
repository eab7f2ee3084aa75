//! Detector-to-processor integration: real tone audio and RFC 2833
//! payloads in, exactly one action out per matched pattern.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use voxbridge_dtmf_core::rfc2833::encode_event;
use voxbridge_dtmf_core::{
    CallActions, DtmfAction, DtmfPattern, DtmfProcessor, InbandDetector, InbandDetectorConfig,
    Rfc2833Decoder,
};

#[derive(Default)]
struct Recorded {
    hangups: Mutex<Vec<String>>,
    ai_frames: Mutex<Vec<Value>>,
}

#[async_trait]
impl CallActions for Recorded {
    async fn forward_to_ai(&self, _call_id: &str, frame: Value) -> bool {
        self.ai_frames.lock().push(frame);
        true
    }

    async fn transfer_call(&self, _call_id: &str, _target: &str) -> bool {
        true
    }

    async fn play_audio(&self, _call_id: &str, _audio_ref: &str) -> bool {
        true
    }

    async fn hangup_call(&self, call_id: &str, _reason: &str) -> bool {
        self.hangups.lock().push(call_id.to_string());
        true
    }

    async fn toggle_recording(&self, _call_id: &str) -> bool {
        true
    }

    async fn enter_ivr(&self, _call_id: &str, _menu_id: &str) -> bool {
        true
    }
}

fn dtmf_tone(low: f64, high: f64, ms: u32) -> Vec<u8> {
    let samples = 8 * ms as usize;
    let mut out = Vec::with_capacity(samples * 2);
    for n in 0..samples {
        let t = n as f64 / 8000.0;
        let value = 0.45 * i16::MAX as f64 * (2.0 * PI * low * t).sin()
            + 0.45 * i16::MAX as f64 * (2.0 * PI * high * t).sin();
        out.extend_from_slice(&(value as i16).to_le_bytes());
    }
    out
}

fn silence(ms: u32) -> Vec<u8> {
    vec![0u8; 8 * ms as usize * 2]
}

/// Keyed tones "1" then "2" then "3" match `^123$` exactly once and leave
/// the per-call sequence empty.
#[tokio::test]
async fn inband_digits_drive_exactly_one_action() {
    let actions = Arc::new(Recorded::default());
    let mut processor = DtmfProcessor::new(actions.clone(), Duration::from_secs(5));
    processor
        .add_pattern(DtmfPattern::new("^123$", DtmfAction::HangupCall).unwrap())
        .unwrap();

    let mut detector = InbandDetector::new(InbandDetectorConfig::default());
    let now = Instant::now();

    let pairs = [(697.0, 1209.0), (697.0, 1336.0), (697.0, 1477.0)];
    let mut events = Vec::new();
    for (low, high) in pairs {
        events.extend(detector.process_audio("call-a", &dtmf_tone(low, high, 60), now));
        events.extend(detector.process_audio("call-a", &silence(60), now));
    }
    let digits: Vec<char> = events.iter().map(|e| e.digit).collect();
    assert_eq!(digits, vec!['1', '2', '3']);

    let mut matches = 0;
    for event in &events {
        if processor.process_event(event).await.is_some() {
            matches += 1;
        }
    }
    assert_eq!(matches, 1, "pattern must fire exactly once");
    assert_eq!(actions.hangups.lock().as_slice(), ["call-a"]);
    assert!(processor.active_sequence("call-a").is_none());
}

/// RFC 2833 start/end payload pairs produce the same pipeline behavior as
/// in-band tones.
#[tokio::test]
async fn rfc2833_payloads_match_patterns() {
    let actions = Arc::new(Recorded::default());
    let mut processor = DtmfProcessor::new(actions.clone(), Duration::from_secs(5));
    processor
        .add_pattern(DtmfPattern::new("^911$", DtmfAction::HangupCall).unwrap())
        .unwrap();

    let mut decoder = Rfc2833Decoder::new();
    let t0 = Instant::now();

    let mut events = Vec::new();
    for (i, code) in [9u8, 1, 1].into_iter().enumerate() {
        let base = t0 + Duration::from_millis(i as u64 * 200);
        assert!(decoder
            .process_payload("call-b", &encode_event(code, false, 160), base)
            .is_none());
        let event = decoder
            .process_payload(
                "call-b",
                &encode_event(code, true, 800),
                base + Duration::from_millis(90),
            )
            .unwrap();
        events.push(event);
    }

    let mut matched = None;
    for event in &events {
        if let Some(outcome) = processor.process_event(event).await {
            matched = Some(outcome);
        }
    }

    let outcome = matched.expect("911 should match");
    assert_eq!(outcome.sequence, "911");
    assert_eq!(actions.hangups.lock().as_slice(), ["call-b"]);

    // The two unmatched leading digits were each forwarded to the AI.
    let frames = actions.ai_frames.lock();
    let digit_frames = frames
        .iter()
        .filter(|f| f["type"] == "dtmf_digit")
        .count();
    assert_eq!(digit_frames, 2);
}

/// Mixed-method input on separate calls never cross-contaminates
/// sequences.
#[tokio::test]
async fn per_call_sequences_are_isolated() {
    let actions = Arc::new(Recorded::default());
    let mut processor = DtmfProcessor::new(actions.clone(), Duration::from_secs(5));
    processor
        .add_pattern(DtmfPattern::new("^77$", DtmfAction::HangupCall).unwrap())
        .unwrap();

    let mut decoder = Rfc2833Decoder::new();
    let t0 = Instant::now();

    // One '7' on each of two calls: neither matches.
    for call in ["x", "y"] {
        decoder.process_payload(call, &encode_event(7, false, 160), t0);
        let event = decoder
            .process_payload(call, &encode_event(7, true, 800), t0)
            .unwrap();
        assert!(processor.process_event(&event).await.is_none());
    }
    assert_eq!(processor.active_sequence("x"), Some("7"));
    assert_eq!(processor.active_sequence("y"), Some("7"));

    // A second '7' on x completes only x.
    decoder.process_payload("x", &encode_event(7, false, 160), t0 + Duration::from_millis(100));
    let event = decoder
        .process_payload("x", &encode_event(7, true, 800), t0 + Duration::from_millis(180))
        .unwrap();
    assert!(processor.process_event(&event).await.is_some());

    assert!(processor.active_sequence("x").is_none());
    assert_eq!(processor.active_sequence("y"), Some("7"));
    assert_eq!(actions.hangups.lock().as_slice(), ["x"]);
}
