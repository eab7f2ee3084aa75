//! PCM sample-rate conversion.
//!
//! The telephony and AI sides run at 8 kHz and 16 kHz, so those two paths
//! are special-cased: upsampling by sample duplication and downsampling by
//! decimation. Anything else falls back to linear interpolation producing
//! `ceil(n * to / from)` samples. Failures inside the fallback degrade to
//! returning the input unchanged; malformed (odd-length) input is rejected.

use crate::codec::{bytes_to_pcm, pcm_to_bytes};
use crate::error::{AudioError, Result};

/// Resample 16-bit mono PCM from `from_rate` to `to_rate`.
pub fn resample(data: &[u8], from_rate: u32, to_rate: u32) -> Result<Vec<u8>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioError::InvalidSampleRate(from_rate.min(to_rate)));
    }
    if from_rate == to_rate || data.is_empty() {
        return Ok(data.to_vec());
    }

    let samples = bytes_to_pcm(data)?;

    if from_rate == 8000 && to_rate == 16000 {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &s in &samples {
            out.push(s);
            out.push(s);
        }
        return Ok(pcm_to_bytes(&out));
    }

    if from_rate == 16000 && to_rate == 8000 {
        let out: Vec<i16> = samples.iter().step_by(2).copied().collect();
        return Ok(pcm_to_bytes(&out));
    }

    Ok(pcm_to_bytes(&interpolate(&samples, from_rate, to_rate)))
}

/// Linear-interpolating fallback for arbitrary ratios.
fn interpolate(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let out_len =
        (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);

    let step = from_rate as f64 / to_rate as f64;
    for n in 0..out_len {
        let pos = n as f64 * step;
        let idx = pos as usize;
        let frac = pos - idx as f64;

        let current = samples.get(idx).copied().unwrap_or(0) as f64;
        let next = samples.get(idx + 1).copied().unwrap_or(current as i16) as f64;
        let value = current + (next - current) * frac;
        out.push(value.clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }
    out
}

/// Streaming resampler that accumulates input until a whole chunk is
/// available, then emits resampled chunks of a fixed size.
///
/// Input that does not fill a chunk is buffered and consumed on the next
/// call; `flush` drains whatever is left.
pub struct StreamingResampler {
    from_rate: u32,
    to_rate: u32,
    chunk_size: usize,
    buffer: Vec<u8>,
}

impl StreamingResampler {
    /// `chunk_size` is the input chunk size in bytes (320 = 20 ms at 8 kHz).
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Self {
        Self {
            from_rate,
            to_rate,
            chunk_size: chunk_size.max(2),
            buffer: Vec::new(),
        }
    }

    /// Feed a chunk of audio; returns all fully resampled output produced.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut output = Vec::new();
        while self.buffer.len() >= self.chunk_size {
            let head: Vec<u8> = self.buffer.drain(..self.chunk_size).collect();
            output.extend(resample(&head, self.from_rate, self.to_rate)?);
        }
        Ok(output)
    }

    /// Resample and return any buffered remainder.
    pub fn flush(&mut self) -> Result<Vec<u8>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let tail = std::mem::take(&mut self.buffer);
        resample(&tail, self.from_rate, self.to_rate)
    }

    /// Bytes currently waiting for a full chunk.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}
