//! Codec conversion and PCM utilities.
//!
//! `convert` is deliberately forgiving: an unknown codec name passes the
//! input through unchanged (best-effort media transform), while the PCM
//! helpers validate their input and fail explicitly.

use crate::error::{AudioError, Result};
use crate::g711;

/// Codecs the transform layer can convert between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// 16-bit signed linear PCM, little-endian.
    Pcm,
    /// G.711 µ-law.
    Pcmu,
    /// G.711 A-law.
    Pcma,
}

impl Codec {
    /// Resolve a codec by its conventional name. Case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PCM" | "L16" => Some(Codec::Pcm),
            "PCMU" | "ULAW" | "G711U" => Some(Codec::Pcmu),
            "PCMA" | "ALAW" | "G711A" => Some(Codec::Pcma),
            _ => None,
        }
    }

    /// Static RTP payload type, where one exists.
    pub fn payload_type(&self) -> Option<u8> {
        match self {
            Codec::Pcmu => Some(0),
            Codec::Pcma => Some(8),
            Codec::Pcm => None,
        }
    }
}

/// Convert audio between codecs by name.
///
/// Same-codec conversion is the identity. Unknown codec names pass the
/// input through unchanged and log once at debug level; this is the one
/// transform where silent pass-through is the contract.
pub fn convert(data: &[u8], from: &str, to: &str) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let (from_codec, to_codec) = match (Codec::from_name(from), Codec::from_name(to)) {
        (Some(f), Some(t)) => (f, t),
        _ => {
            tracing::debug!(%from, %to, "unknown codec name, passing audio through");
            return data.to_vec();
        }
    };

    if from_codec == to_codec {
        return data.to_vec();
    }

    match (from_codec, to_codec) {
        (Codec::Pcmu, Codec::Pcm) => pcm_to_bytes(&expand(data, g711::ulaw_expand)),
        (Codec::Pcma, Codec::Pcm) => pcm_to_bytes(&expand(data, g711::alaw_expand)),
        (Codec::Pcm, Codec::Pcmu) => match bytes_to_pcm(data) {
            Ok(samples) => compress(&samples, g711::ulaw_compress),
            Err(_) => {
                tracing::debug!("odd-length PCM input, passing audio through");
                data.to_vec()
            }
        },
        (Codec::Pcm, Codec::Pcma) => match bytes_to_pcm(data) {
            Ok(samples) => compress(&samples, g711::alaw_compress),
            Err(_) => {
                tracing::debug!("odd-length PCM input, passing audio through");
                data.to_vec()
            }
        },
        // Companded-to-companded goes through linear PCM.
        (Codec::Pcmu, Codec::Pcma) => {
            compress(&expand(data, g711::ulaw_expand), g711::alaw_compress)
        }
        (Codec::Pcma, Codec::Pcmu) => {
            compress(&expand(data, g711::alaw_expand), g711::ulaw_compress)
        }
        _ => data.to_vec(),
    }
}

fn expand(data: &[u8], f: fn(u8) -> i16) -> Vec<i16> {
    data.iter().map(|&b| f(b)).collect()
}

fn compress(samples: &[i16], f: fn(i16) -> u8) -> Vec<u8> {
    samples.iter().map(|&s| f(s)).collect()
}

/// Reinterpret a little-endian byte buffer as PCM samples.
pub fn bytes_to_pcm(data: &[u8]) -> Result<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(AudioError::OddPcmLength(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serialize PCM samples to little-endian bytes.
pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Scale PCM by a linear factor, saturating to the `i16` range.
pub fn adjust_volume(pcm: &[u8], factor: f32) -> Result<Vec<u8>> {
    let samples = bytes_to_pcm(pcm)?;
    let scaled: Vec<i16> = samples
        .iter()
        .map(|&s| (s as f32 * factor).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect();
    Ok(pcm_to_bytes(&scaled))
}

/// True when the RMS level of the PCM buffer falls below `threshold`.
///
/// An empty buffer counts as silence.
pub fn detect_silence(pcm: &[u8], threshold: f64) -> Result<bool> {
    let samples = bytes_to_pcm(pcm)?;
    if samples.is_empty() {
        return Ok(true);
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_squares / samples.len() as f64).sqrt();
    Ok(rms < threshold)
}

/// Zero PCM of exactly `ms` milliseconds at `sample_rate`.
pub fn create_silence(ms: u32, sample_rate: u32) -> Vec<u8> {
    let samples = (sample_rate as usize / 1000) * ms as usize;
    vec![0u8; samples * 2]
}

/// Split PCM into fixed frames of `frame_ms` (320 bytes at 8 kHz / 20 ms).
///
/// A trailing partial frame is zero-padded to full size.
pub fn split_frames(pcm: &[u8], frame_ms: u32, sample_rate: u32) -> Vec<Vec<u8>> {
    let frame_bytes = (sample_rate as usize / 1000) * frame_ms as usize * 2;
    if frame_bytes == 0 || pcm.is_empty() {
        return Vec::new();
    }

    let mut frames = Vec::with_capacity(pcm.len() / frame_bytes + 1);
    for chunk in pcm.chunks(frame_bytes) {
        let mut frame = chunk.to_vec();
        frame.resize(frame_bytes, 0);
        frames.push(frame);
    }
    frames
}

/// Sample-wise average of two PCM buffers with saturation.
///
/// The shorter input is treated as padded with silence.
pub fn mix(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    let samples_a = bytes_to_pcm(a)?;
    let samples_b = bytes_to_pcm(b)?;
    let len = samples_a.len().max(samples_b.len());

    let mut mixed = Vec::with_capacity(len);
    for i in 0..len {
        let sa = samples_a.get(i).copied().unwrap_or(0) as i32;
        let sb = samples_b.get(i).copied().unwrap_or(0) as i32;
        mixed.push(((sa + sb) / 2) as i16);
    }
    Ok(pcm_to_bytes(&mixed))
}
