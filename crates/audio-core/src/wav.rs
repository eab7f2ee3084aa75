//! Minimal WAV container reading for prompt and hold-music sources.
//!
//! Only PCM16 is accepted. Stereo is downmixed by averaging; a sample-rate
//! mismatch is resolved by resampling to the requested rate. Anything the
//! parser cannot validate is an error, never a silent pass-through.

use crate::codec::{bytes_to_pcm, pcm_to_bytes};
use crate::error::{AudioError, Result};
use crate::resample::resample;

/// Decoded WAV audio.
#[derive(Debug, Clone)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono 16-bit little-endian PCM (already downmixed).
    pub pcm: Vec<u8>,
}

/// Parse a RIFF/WAVE buffer into mono PCM16.
pub fn parse_wav(data: &[u8]) -> Result<WavAudio> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(AudioError::InvalidWav("missing RIFF/WAVE header".into()));
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None; // format, channels, rate, bits
    let mut pcm_data: Option<&[u8]> = None;

    let mut offset = 12;
    while offset + 8 <= data.len() {
        let chunk_id = &data[offset..offset + 4];
        let chunk_len = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        let body_end = body_start.checked_add(chunk_len).unwrap_or(data.len());
        if body_end > data.len() {
            return Err(AudioError::InvalidWav("truncated chunk".into()));
        }
        let body = &data[body_start..body_end];

        match chunk_id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(AudioError::InvalidWav("fmt chunk too short".into()));
                }
                let format = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let bits = u16::from_le_bytes([body[14], body[15]]);
                fmt = Some((format, channels, rate, bits));
            }
            b"data" => pcm_data = Some(body),
            _ => {}
        }

        // Chunks are word-aligned.
        offset = body_end + (chunk_len & 1);
    }

    let (format, channels, sample_rate, bits) =
        fmt.ok_or_else(|| AudioError::InvalidWav("missing fmt chunk".into()))?;
    let body = pcm_data.ok_or_else(|| AudioError::InvalidWav("missing data chunk".into()))?;

    if format != 1 {
        return Err(AudioError::InvalidWav(format!(
            "unsupported format tag {format}, only PCM is accepted"
        )));
    }
    if bits != 16 {
        return Err(AudioError::InvalidWav(format!(
            "unsupported bit depth {bits}, only 16-bit is accepted"
        )));
    }
    if channels == 0 || channels > 2 {
        return Err(AudioError::InvalidWav(format!(
            "unsupported channel count {channels}"
        )));
    }

    let samples = bytes_to_pcm(body)?;
    let mono = if channels == 2 {
        samples
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect()
    } else {
        samples
    };

    Ok(WavAudio {
        sample_rate,
        channels,
        pcm: pcm_to_bytes(&mono),
    })
}

/// Parse a WAV buffer and deliver mono PCM16 at `target_rate`.
pub fn load_wav_pcm(data: &[u8], target_rate: u32) -> Result<Vec<u8>> {
    let wav = parse_wav(data)?;
    if wav.sample_rate == target_rate {
        Ok(wav.pcm)
    } else {
        resample(&wav.pcm, wav.sample_rate, target_rate)
    }
}
