//! Telephony audio transforms.
//!
//! Conversions between the 8-bit companded codecs used on the telephone side
//! (G.711 µ-law and A-law) and the 16-bit signed linear PCM the AI platform
//! expects, plus the PCM utilities the media path needs: volume scaling,
//! silence handling, fixed-size framing, mixing, and sample-rate conversion.
//!
//! All multi-byte PCM is little-endian `i16` mono.

pub mod codec;
pub mod error;
pub mod g711;
pub mod resample;
pub mod wav;

pub use codec::{adjust_volume, convert, create_silence, detect_silence, mix, split_frames, Codec};
pub use error::{AudioError, Result};
pub use resample::{resample, StreamingResampler};
pub use wav::{load_wav_pcm, parse_wav, WavAudio};
