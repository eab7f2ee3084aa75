//! voxbridge daemon.
//!
//! Loads a JSON configuration (first argument) or falls back to development
//! defaults, wires the bridge, and runs until interrupted. Deployments
//! replace [`LoggingSignaling`] with an adapter that actually talks to
//! their SIP proxy.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use voxbridge::infra::{setup_logging, BridgeConfig, LogFormat, LoggingConfig};
use voxbridge::signaling::{Result as SignalingResult, SendResult, SignalingCommands, TransferMode};
use voxbridge::Bridge;

/// Stand-in signaling backend that logs every command. Useful for local
/// development against a synthetic event feed.
struct LoggingSignaling;

#[async_trait::async_trait]
impl SignalingCommands for LoggingSignaling {
    async fn hangup(&self, call_id: &str) -> SignalingResult<()> {
        tracing::info!(call_id, "signaling command: hangup");
        Ok(())
    }

    async fn transfer(
        &self,
        call_id: &str,
        target: &str,
        mode: TransferMode,
    ) -> SignalingResult<()> {
        tracing::info!(call_id, target, ?mode, "signaling command: transfer");
        Ok(())
    }

    async fn play_audio(&self, call_id: &str, audio_ref: &str) -> SignalingResult<()> {
        tracing::info!(call_id, audio_ref, "signaling command: play_audio");
        Ok(())
    }

    async fn dtmf_send(&self, call_id: &str, digit: &str) -> SignalingResult<()> {
        tracing::info!(call_id, digit, "signaling command: dtmf_send");
        Ok(())
    }

    async fn send_message(
        &self,
        to_uri: &str,
        from_uri: &str,
        _body: &str,
        _headers: &HashMap<String, String>,
    ) -> SignalingResult<SendResult> {
        tracing::info!(to_uri, from_uri, "signaling command: send_message");
        Ok(SendResult::ok())
    }
}

fn load_config() -> anyhow::Result<BridgeConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            let config: BridgeConfig =
                serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))?;
            Ok(config)
        }
        None => {
            tracing::warn!("no config file given, using development defaults");
            let mut config = BridgeConfig::default();
            config.security.jwt_secret = "dev-jwt-secret".to_string();
            config.security.hmac_secret = "dev-hmac-secret".to_string();
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::var("VOXBRIDGE_LOG_FORMAT")
        .ok()
        .map(|value| value.parse::<LogFormat>())
        .transpose()
        .context("parsing VOXBRIDGE_LOG_FORMAT")?
        .unwrap_or(LogFormat::Full);
    setup_logging(LoggingConfig {
        format,
        ..Default::default()
    })
    .context("initializing logging")?;

    let config = load_config()?;
    config.validate().context("validating configuration")?;

    let bridge = Bridge::new(config, Arc::new(LoggingSignaling));
    bridge.start();
    tracing::info!("voxbridge running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    bridge.shutdown().await;
    Ok(())
}
