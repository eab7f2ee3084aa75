//! Typed process configuration.
//!
//! The bridge consumes its configuration as one structured record. Loading
//! (files, environment, flags) is the embedding process's business; this
//! module only defines the shape, the defaults, and validation.

use serde::Deserialize;

use crate::errors::{Error, Result};

/// Network-facing endpoints and port ranges.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port the signaling plane connects to.
    pub sip_ws_port: u16,
    /// WebSocket URL of the AI platform.
    pub ai_platform_url: String,
    /// Inclusive RTP port range; only even ports are allocated.
    pub rtp_port_range: (u16, u16),
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            sip_ws_port: 8080,
            ai_platform_url: "ws://127.0.0.1:9000/voice".to_string(),
            rtp_port_range: (10000, 20000),
        }
    }
}

/// Audio format parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Telephony-side sample rate in Hz.
    pub sample_rate: u32,
    /// Frame duration in milliseconds.
    pub frame_ms: u32,
    /// Sample rate expected by the AI platform in Hz.
    pub ai_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            frame_ms: 20,
            ai_sample_rate: 16000,
        }
    }
}

/// Concurrency and capacity limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_concurrent_calls: usize,
    pub max_calls_per_number: usize,
    pub max_queue_size: usize,
    pub sms_queue_max: usize,
    pub sms_global_rate_per_min: usize,
    pub sms_per_number_rate_per_min: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 100,
            max_calls_per_number: 3,
            max_queue_size: 50,
            sms_queue_max: 10000,
            sms_global_rate_per_min: 100,
            sms_per_number_rate_per_min: 10,
        }
    }
}

/// Timeouts and sweep intervals, all in the unit the field name states.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub dtmf_sequence_timeout_s: u64,
    pub ivr_session_timeout_s: u64,
    pub sms_expiry_h: u64,
    pub sms_retry_interval_s: u64,
    pub sms_delivery_timeout_s: u64,
    pub ai_heartbeat_s: u64,
    pub ai_max_retries: u32,
    pub queued_call_timeout_s: u64,
    pub stale_call_sweep_s: u64,
    pub stale_call_max_age_s: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            dtmf_sequence_timeout_s: 5,
            ivr_session_timeout_s: 300,
            sms_expiry_h: 24,
            sms_retry_interval_s: 300,
            sms_delivery_timeout_s: 1800,
            ai_heartbeat_s: 30,
            ai_max_retries: 5,
            queued_call_timeout_s: 300,
            stale_call_sweep_s: 300,
            stale_call_max_age_s: 14400,
        }
    }
}

/// Secrets for the AI platform handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Secret used to sign the bearer JWT.
    pub jwt_secret: String,
    /// Secret used for the HMAC-SHA256 request signature.
    pub hmac_secret: String,
    /// Identifier of this bridge instance, carried as a JWT claim.
    pub instance_id: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            hmac_secret: String::new(),
            instance_id: "voxbridge-1".to_string(),
        }
    }
}

/// Top-level configuration record for a bridge process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub limits: LimitsConfig,
    pub timings: TimingsConfig,
    pub security: SecurityConfig,
}

impl BridgeConfig {
    /// Validate cross-field consistency. Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        let (start, end) = self.network.rtp_port_range;
        if start >= end {
            return Err(Error::Config(format!(
                "rtp_port_range start {} must be below end {}",
                start, end
            )));
        }
        if self.audio.sample_rate == 0 || self.audio.ai_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".into()));
        }
        if self.audio.frame_ms == 0 {
            return Err(Error::Config("frame_ms must be non-zero".into()));
        }
        if self.limits.max_concurrent_calls == 0 {
            return Err(Error::Config("max_concurrent_calls must be non-zero".into()));
        }
        if self.limits.max_calls_per_number == 0 {
            return Err(Error::Config("max_calls_per_number must be non-zero".into()));
        }
        if self.security.jwt_secret.is_empty() || self.security.hmac_secret.is_empty() {
            return Err(Error::Config(
                "jwt_secret and hmac_secret must be configured".into(),
            ));
        }
        Ok(())
    }

    /// Bytes per telephony-side PCM frame (16-bit mono).
    pub fn frame_bytes(&self) -> usize {
        (self.audio.sample_rate as usize / 1000) * self.audio.frame_ms as usize * 2
    }
}
