//! In-band DTMF detection with the Goertzel algorithm.
//!
//! Audio is consumed in 20 ms frames (160 samples at 8 kHz). Each frame is
//! Hann-windowed and run through eight Goertzel filters, one per DTMF
//! frequency. A digit is accepted when both group maxima clear the energy
//! threshold, non-maximum frequencies in each group stay at or below half
//! the maximum (twist rejection), and the high/low group ratio lies in
//! `[0.5, 2.0]`. A digit is reported once it stops (or another digit
//! starts) and its consistent-detection run covers the minimum duration.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use crate::event::{DtmfEvent, DtmfMethod};

const LOW_FREQS: [u16; 4] = [697, 770, 852, 941];
const HIGH_FREQS: [u16; 4] = [1209, 1336, 1477, 1633];

const DTMF_MATRIX: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

/// Detector tuning.
#[derive(Debug, Clone)]
pub struct InbandDetectorConfig {
    pub sample_rate: u32,
    /// Samples per analysis frame (20 ms at the sample rate).
    pub frame_size: usize,
    /// Goertzel energy threshold for both group maxima.
    pub energy_threshold: f64,
    /// Shortest tone reported, in milliseconds of consistent detection.
    pub min_duration_ms: u32,
    /// Suppress a repeat of the same digit within this gap.
    pub debounce_gap: Duration,
}

impl Default for InbandDetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            frame_size: 160,
            energy_threshold: 1_000_000.0,
            min_duration_ms: 40,
            debounce_gap: Duration::from_millis(50),
        }
    }
}

struct CallState {
    buffer: Vec<i16>,
    current: Option<(char, u32)>,
    last_emitted: Option<(char, Instant)>,
}

impl CallState {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            current: None,
            last_emitted: None,
        }
    }
}

/// Goertzel-based detector with per-call state.
pub struct InbandDetector {
    config: InbandDetectorConfig,
    frame_ms: u32,
    coefficients: [(u16, f64); 8],
    window: Vec<f64>,
    calls: HashMap<String, CallState>,
    frames_dropped: u64,
}

impl InbandDetector {
    pub fn new(config: InbandDetectorConfig) -> Self {
        let n = config.frame_size;
        let mut coefficients = [(0u16, 0f64); 8];
        for (i, &freq) in LOW_FREQS.iter().chain(HIGH_FREQS.iter()).enumerate() {
            let k = (0.5 + n as f64 * freq as f64 / config.sample_rate as f64) as usize;
            let w = 2.0 * PI * k as f64 / n as f64;
            coefficients[i] = (freq, 2.0 * w.cos());
        }

        let window = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (n - 1) as f64).cos()))
            .collect();

        let frame_ms = (config.frame_size as u64 * 1000 / config.sample_rate as u64) as u32;

        Self {
            config,
            frame_ms,
            coefficients,
            window,
            calls: HashMap::new(),
            frames_dropped: 0,
        }
    }

    /// Feed PCM for one call; returns every digit event completed by this
    /// chunk of audio.
    pub fn process_audio(&mut self, call_id: &str, pcm: &[u8], now: Instant) -> Vec<DtmfEvent> {
        if pcm.len() % 2 != 0 {
            self.frames_dropped += 1;
            tracing::debug!(call_id, "dropping odd-length audio for in-band detection");
            return Vec::new();
        }

        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let frame_size = self.config.frame_size;
        let state = self
            .calls
            .entry(call_id.to_string())
            .or_insert_with(CallState::new);
        state.buffer.extend_from_slice(&samples);

        let mut frames = Vec::new();
        while state.buffer.len() >= frame_size {
            let frame: Vec<i16> = state.buffer.drain(..frame_size).collect();
            frames.push(frame);
        }

        let mut events = Vec::new();
        for frame in frames {
            let detected = self.detect_in_frame(&frame);
            if let Some(event) = self.advance_state(call_id, detected, now) {
                events.push(event);
            }
        }
        events
    }

    /// Force-close any in-progress digit (call teardown).
    pub fn flush_call(&mut self, call_id: &str, now: Instant) -> Option<DtmfEvent> {
        let event = self.advance_state(call_id, None, now);
        self.calls.remove(call_id);
        event
    }

    pub fn cleanup_call(&mut self, call_id: &str) {
        self.calls.remove(call_id);
    }

    fn advance_state(
        &mut self,
        call_id: &str,
        detected: Option<char>,
        now: Instant,
    ) -> Option<DtmfEvent> {
        let min_frames = self.config.min_duration_ms.div_ceil(self.frame_ms).max(1);
        let frame_ms = self.frame_ms;
        let debounce = self.config.debounce_gap;

        let state = self.calls.get_mut(call_id)?;

        match (state.current, detected) {
            (None, None) => None,
            (None, Some(digit)) => {
                state.current = Some((digit, 1));
                None
            }
            (Some((current, frames)), Some(digit)) if current == digit => {
                state.current = Some((current, frames + 1));
                None
            }
            (Some((current, frames)), other) => {
                // Digit ended (silence) or a new digit flushes the old one.
                state.current = other.map(|d| (d, 1));

                if frames < min_frames {
                    return None;
                }
                if let Some((last_digit, last_at)) = state.last_emitted {
                    if last_digit == current && now.duration_since(last_at) < debounce {
                        tracing::debug!(call_id, digit = %current, "debounced repeated digit");
                        return None;
                    }
                }
                state.last_emitted = Some((current, now));

                Some(DtmfEvent {
                    call_id: call_id.to_string(),
                    digit: current,
                    method: DtmfMethod::Inband,
                    timestamp: now,
                    duration_ms: Some(frames * frame_ms),
                    confidence: 0.8,
                })
            }
        }
    }

    fn detect_in_frame(&self, frame: &[i16]) -> Option<char> {
        let windowed: Vec<f64> = frame
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| s as f64 * w)
            .collect();

        let mut energies = [0f64; 8];
        for (i, &(_freq, coeff)) in self.coefficients.iter().enumerate() {
            energies[i] = goertzel(&windowed, coeff);
        }

        let (low_index, low_energy) = max_in(&energies[0..4]);
        let (high_index, high_energy) = max_in(&energies[4..8]);

        if low_energy < self.config.energy_threshold || high_energy < self.config.energy_threshold {
            return None;
        }

        // Twist rejection: every non-maximum frequency in a group must stay
        // at or below half the group maximum.
        for (i, &e) in energies[0..4].iter().enumerate() {
            if i != low_index && e > low_energy * 0.5 {
                return None;
            }
        }
        for (i, &e) in energies[4..8].iter().enumerate() {
            if i != high_index && e > high_energy * 0.5 {
                return None;
            }
        }

        let ratio = high_energy / low_energy;
        if !(0.5..=2.0).contains(&ratio) {
            return None;
        }

        Some(DTMF_MATRIX[low_index][high_index])
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

fn max_in(energies: &[f64]) -> (usize, f64) {
    let mut index = 0;
    let mut best = energies[0];
    for (i, &e) in energies.iter().enumerate().skip(1) {
        if e > best {
            best = e;
            index = i;
        }
    }
    (index, best)
}

/// Single-bin Goertzel power.
fn goertzel(samples: &[f64], coeff: f64) -> f64 {
    let mut s_prev = 0.0;
    let mut s_prev2 = 0.0;
    for &sample in samples {
        let s = sample + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Summed two-tone PCM at 8 kHz with per-tone amplitude as a fraction
    /// of full scale.
    fn dtmf_tone(low: f64, high: f64, ms: u32, amplitude: f64) -> Vec<u8> {
        let samples = 8 * ms as usize;
        let mut out = Vec::with_capacity(samples * 2);
        for n in 0..samples {
            let t = n as f64 / 8000.0;
            let value = amplitude * i16::MAX as f64 * (2.0 * PI * low * t).sin()
                + amplitude * i16::MAX as f64 * (2.0 * PI * high * t).sin();
            let sample = value.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    fn silence(ms: u32) -> Vec<u8> {
        vec![0u8; 8 * ms as usize * 2]
    }

    #[test]
    fn detects_digit_one_after_80ms() {
        let mut detector = InbandDetector::new(InbandDetectorConfig::default());
        let now = Instant::now();

        let mut events = detector.process_audio("c1", &dtmf_tone(697.0, 1209.0, 80, 0.5), now);
        events.extend(detector.process_audio("c1", &silence(40), now));

        assert_eq!(events.len(), 1, "expected exactly one event");
        let event = &events[0];
        assert_eq!(event.digit, '1');
        assert_eq!(event.method, DtmfMethod::Inband);
        let duration = event.duration_ms.unwrap();
        assert!((70..=90).contains(&duration), "duration {duration} out of range");
    }

    #[test]
    fn thirty_ms_tone_is_below_the_duration_gate() {
        let mut detector = InbandDetector::new(InbandDetectorConfig::default());
        let now = Instant::now();

        let mut events = detector.process_audio("c1", &dtmf_tone(697.0, 1209.0, 30, 0.5), now);
        events.extend(detector.process_audio("c1", &silence(60), now));
        assert!(events.is_empty());
    }

    #[test]
    fn forty_ms_tone_is_detected() {
        let mut detector = InbandDetector::new(InbandDetectorConfig::default());
        let now = Instant::now();

        let mut events = detector.process_audio("c1", &dtmf_tone(941.0, 1336.0, 40, 0.5), now);
        events.extend(detector.process_audio("c1", &silence(40), now));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].digit, '0');
    }

    #[test]
    fn digit_change_flushes_the_first_digit() {
        let mut detector = InbandDetector::new(InbandDetectorConfig::default());
        let now = Instant::now();

        let mut events = detector.process_audio("c1", &dtmf_tone(697.0, 1209.0, 60, 0.5), now);
        // '9' starts immediately, flushing '1'.
        events.extend(detector.process_audio("c1", &dtmf_tone(852.0, 1477.0, 60, 0.5), now));
        events.extend(detector.process_audio("c1", &silence(40), now));

        let digits: Vec<char> = events.iter().map(|e| e.digit).collect();
        assert_eq!(digits, vec!['1', '9']);
    }

    #[test]
    fn silence_and_speechlike_noise_yield_nothing() {
        let mut detector = InbandDetector::new(InbandDetectorConfig::default());
        let now = Instant::now();

        assert!(detector.process_audio("c1", &silence(100), now).is_empty());

        // A lone 1 kHz tone has no valid low/high pairing.
        let lone: Vec<u8> = dtmf_tone(1000.0, 1000.0, 100, 0.25);
        let mut events = detector.process_audio("c1", &lone, now);
        events.extend(detector.process_audio("c1", &silence(40), now));
        assert!(events.is_empty());
    }

    #[test]
    fn odd_length_audio_is_dropped() {
        let mut detector = InbandDetector::new(InbandDetectorConfig::default());
        let events = detector.process_audio("c1", &[0u8; 321], Instant::now());
        assert!(events.is_empty());
        assert_eq!(detector.frames_dropped(), 1);
    }

    #[test]
    fn all_sixteen_digits_decode() {
        let mut detector = InbandDetector::new(InbandDetectorConfig::default());
        let now = Instant::now();
        let lows = [697.0, 770.0, 852.0, 941.0];
        let highs = [1209.0, 1336.0, 1477.0, 1633.0];

        for (row, &low) in lows.iter().enumerate() {
            for (col, &high) in highs.iter().enumerate() {
                let call = format!("c-{row}-{col}");
                let mut events =
                    detector.process_audio(&call, &dtmf_tone(low, high, 60, 0.4), now);
                events.extend(detector.process_audio(&call, &silence(40), now));
                assert_eq!(events.len(), 1, "digit at {row},{col}");
                assert_eq!(events[0].digit, DTMF_MATRIX[row][col]);
            }
        }
    }
}
