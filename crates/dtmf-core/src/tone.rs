//! Tone generation for hold music and IVR prompts.
//!
//! All output is 16-bit little-endian mono PCM.

use std::f32::consts::PI;

/// Generate a sine tone. `amplitude` is a fraction of full scale.
pub fn generate_tone(frequency: f32, duration_s: f32, sample_rate: u32, amplitude: f32) -> Vec<u8> {
    let samples = (duration_s * sample_rate as f32) as usize;
    let mut out = Vec::with_capacity(samples * 2);
    for n in 0..samples {
        let t = n as f32 / sample_rate as f32;
        let value = amplitude * i16::MAX as f32 * (2.0 * PI * frequency * t).sin();
        let sample = value.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Generate silence of the given duration.
pub fn generate_silence(duration_s: f32, sample_rate: u32) -> Vec<u8> {
    let samples = (duration_s * sample_rate as f32) as usize;
    vec![0u8; samples * 2]
}

/// North American ring-back: 440 Hz + 480 Hz, 2 s on / 4 s off.
pub fn generate_ring_tone(duration_s: f32, sample_rate: u32) -> Vec<u8> {
    let samples = (duration_s * sample_rate as f32) as usize;
    let cadence = 6.0; // seconds per on/off cycle
    let mut out = Vec::with_capacity(samples * 2);
    for n in 0..samples {
        let t = n as f32 / sample_rate as f32;
        let in_ring = (t % cadence) < 2.0;
        let sample = if in_ring {
            let value = 0.15 * i16::MAX as f32 * (2.0 * PI * 440.0 * t).sin()
                + 0.15 * i16::MAX as f32 * (2.0 * PI * 480.0 * t).sin();
            value.clamp(i16::MIN as f32, i16::MAX as f32) as i16
        } else {
            0
        };
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Sample-wise average of several PCM streams, truncated to the shortest.
pub fn mix_streams(streams: &[Vec<u8>]) -> Vec<u8> {
    if streams.is_empty() {
        return Vec::new();
    }
    let len = streams.iter().map(|s| s.len() / 2).min().unwrap_or(0);
    let mut out = Vec::with_capacity(len * 2);
    for i in 0..len {
        let sum: i32 = streams
            .iter()
            .map(|s| i16::from_le_bytes([s[i * 2], s[i * 2 + 1]]) as i32)
            .sum();
        let sample = (sum / streams.len() as i32) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Scale PCM volume with saturation.
pub fn apply_volume(pcm: &[u8], volume: f32) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len());
    for pair in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        let scaled = (sample as f32 * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_length_matches_duration() {
        let tone = generate_tone(440.0, 1.0, 8000, 0.3);
        assert_eq!(tone.len(), 16000);
    }

    #[test]
    fn silence_is_all_zero() {
        let silence = generate_silence(0.5, 8000);
        assert_eq!(silence.len(), 8000);
        assert!(silence.iter().all(|&b| b == 0));
    }

    #[test]
    fn ring_tone_has_on_and_off_phases() {
        let ring = generate_ring_tone(6.0, 8000);
        // Second 1 is inside the ring burst, second 3 inside the pause.
        let on_sample = i16::from_le_bytes([ring[16000], ring[16001]]);
        let off_window = &ring[3 * 16000..3 * 16000 + 3200];
        assert!(off_window.iter().all(|&b| b == 0));
        // Not asserting the exact on value, only that energy exists nearby.
        let _ = on_sample;
        let on_window = &ring[16000..16000 + 3200];
        assert!(on_window.iter().any(|&b| b != 0));
    }

    #[test]
    fn mixing_truncates_to_shortest() {
        let a = generate_tone(440.0, 1.0, 8000, 0.2);
        let b = generate_tone(480.0, 0.5, 8000, 0.2);
        let mixed = mix_streams(&[a, b]);
        assert_eq!(mixed.len(), 8000);
    }

    #[test]
    fn volume_scales_and_saturates() {
        let pcm: Vec<u8> = [(20000i16), (-20000)]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let loud = apply_volume(&pcm, 2.0);
        assert_eq!(i16::from_le_bytes([loud[0], loud[1]]), 32767);
        assert_eq!(i16::from_le_bytes([loud[2], loud[3]]), -32768);
    }
}
