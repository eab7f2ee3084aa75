//! Per-call WebSocket connection management.
//!
//! `connect_for_call` dials the AI platform with exponential backoff,
//! sends the auth frame, and starts a read loop that dispatches inbound
//! frames to the registered handler. The send path has no queue: writes go
//! straight to the socket under a deadline, and a stalled write surfaces
//! as an error so the owning call can be failed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::auth::{build_token, sign_request};
use crate::error::{AiBridgeError, Result};
use crate::protocol::{self, AiControl, CallSection};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const TOKEN_TTL_S: u64 = 3600;
const HEARTBEAT_FAILURE_LIMIT: u32 = 2;

/// Call metadata sent with the auth frame.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: String,
    pub from_number: String,
    pub to_number: String,
    pub direction: String,
    pub sip_headers: HashMap<String, String>,
    pub codec: String,
    pub sample_rate: u32,
}

/// Receives everything the AI sends for a call.
#[async_trait]
pub trait AiFrameHandler: Send + Sync {
    /// Decoded PCM from an `audio_data` frame (or a binary frame).
    async fn on_audio(&self, call_id: &str, pcm: Vec<u8>);

    /// Any non-audio control frame.
    async fn on_control(&self, call_id: &str, control: AiControl);

    /// The socket closed (either side).
    async fn on_disconnected(&self, call_id: &str);

    /// Two consecutive heartbeats failed; the call should be cleaned up.
    async fn on_heartbeat_failed(&self, call_id: &str);
}

/// Bridge connection settings.
#[derive(Debug, Clone)]
pub struct AiBridgeConfig {
    pub url: String,
    pub jwt_secret: String,
    pub hmac_secret: String,
    pub instance_id: String,
    /// Connect retries after the first attempt; delay is `2^attempt` seconds.
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    pub write_deadline: Duration,
}

impl AiBridgeConfig {
    pub fn new(url: &str, jwt_secret: &str, hmac_secret: &str, instance_id: &str) -> Self {
        Self {
            url: url.to_string(),
            jwt_secret: jwt_secret.to_string(),
            hmac_secret: hmac_secret.to_string(),
            instance_id: instance_id.to_string(),
            max_retries: 5,
            heartbeat_interval: Duration::from_secs(30),
            write_deadline: Duration::from_secs(5),
        }
    }
}

struct Connection {
    call_id: String,
    session_id: String,
    sink: Mutex<WsSink>,
    handler: Arc<dyn AiFrameHandler>,
    ping_failures: AtomicU32,
    sequence: AtomicU32,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Manager for all per-call AI connections.
pub struct AiConnectionManager {
    config: AiBridgeConfig,
    connections: Arc<DashMap<String, Arc<Connection>>>,
    heartbeat: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl AiConnectionManager {
    pub fn new(config: AiBridgeConfig) -> Self {
        Self {
            config,
            connections: Arc::new(DashMap::new()),
            heartbeat: parking_lot::Mutex::new(None),
        }
    }

    /// Open, authenticate, and register the connection for a call.
    /// Returns the AI session id.
    pub async fn connect_for_call(
        &self,
        call_info: &CallInfo,
        handler: Arc<dyn AiFrameHandler>,
    ) -> Result<String> {
        let call_id = call_info.call_id.clone();

        let ws = self.dial().await?;
        let (mut sink, stream) = ws.split();

        let session_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp() as u64;
        let token = build_token(
            &self.config.jwt_secret,
            &call_id,
            &self.config.instance_id,
            now,
            TOKEN_TTL_S,
        )?;
        let signature = sign_request(&self.config.hmac_secret, &call_id, now);

        let call = CallSection {
            conversation_id: call_id.clone(),
            from_number: call_info.from_number.clone(),
            to_number: call_info.to_number.clone(),
            direction: call_info.direction.clone(),
            sip_headers: call_info.sip_headers.clone(),
            codec: call_info.codec.clone(),
            sample_rate: call_info.sample_rate,
        };
        let auth = protocol::auth_frame(&token, &signature, now, &call_id, &call);
        sink.send(Message::Text(auth.to_string())).await?;

        let connection = Arc::new(Connection {
            call_id: call_id.clone(),
            session_id: session_id.clone(),
            sink: Mutex::new(sink),
            handler: handler.clone(),
            ping_failures: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
            reader: parking_lot::Mutex::new(None),
        });

        let reader = tokio::spawn(Self::read_loop(
            stream,
            call_id.clone(),
            handler,
            self.connections.clone(),
        ));
        *connection.reader.lock() = Some(reader);

        self.connections.insert(call_id.clone(), connection);
        tracing::info!(call_id = %call_id, session_id = %session_id, "connected to AI platform");
        Ok(session_id)
    }

    async fn dial(&self) -> Result<WsStream> {
        let mut attempt = 0u32;
        loop {
            match connect_async(self.config.url.as_str()).await {
                Ok((ws, _response)) => return Ok(ws),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        tracing::error!(error = %e, attempts = attempt, "AI platform unreachable");
                        return Err(AiBridgeError::Unreachable { attempts: attempt });
                    }
                    let delay = Duration::from_secs(1u64 << attempt.min(6));
                    tracing::warn!(error = %e, attempt, delay_s = delay.as_secs(), "AI connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn read_loop(
        mut stream: SplitStream<WsStream>,
        call_id: String,
        handler: Arc<dyn AiFrameHandler>,
        connections: Arc<DashMap<String, Arc<Connection>>>,
    ) {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => match protocol::parse_inbound(&text) {
                    Some(AiControl::Audio(pcm)) => handler.on_audio(&call_id, pcm).await,
                    Some(control) => handler.on_control(&call_id, control).await,
                    None => {
                        tracing::debug!(call_id = %call_id, "unparseable frame from AI");
                    }
                },
                Ok(Message::Binary(pcm)) => handler.on_audio(&call_id, pcm).await,
                Ok(Message::Pong(_)) => {
                    if let Some(conn) = connections.get(&call_id) {
                        conn.ping_failures.store(0, Ordering::Relaxed);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(call_id = %call_id, error = %e, "AI socket read error");
                    break;
                }
            }
        }

        connections.remove(&call_id);
        handler.on_disconnected(&call_id).await;
    }

    /// Send one PCM frame as `audio_data`. A stalled write is an error the
    /// caller must treat as fatal for the call.
    pub async fn send_audio(&self, call_id: &str, pcm: &[u8]) -> Result<()> {
        let connection = self
            .connections
            .get(call_id)
            .map(|c| c.clone())
            .ok_or_else(|| AiBridgeError::NotConnected(call_id.to_string()))?;

        let sequence = (connection.sequence.fetch_add(1, Ordering::Relaxed) & 0xFFFF) as u16;
        let timestamp = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let frame = protocol::audio_frame(call_id, pcm, timestamp, sequence);
        self.send_to(&connection, frame).await
    }

    /// Send an arbitrary JSON frame (DTMF events, status, errors).
    pub async fn send_frame(&self, call_id: &str, frame: Value) -> Result<()> {
        let connection = self
            .connections
            .get(call_id)
            .map(|c| c.clone())
            .ok_or_else(|| AiBridgeError::NotConnected(call_id.to_string()))?;
        self.send_to(&connection, frame).await
    }

    async fn send_to(&self, connection: &Connection, frame: Value) -> Result<()> {
        let mut sink = connection.sink.lock().await;
        match tokio::time::timeout(
            self.config.write_deadline,
            sink.send(Message::Text(frame.to_string())),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(AiBridgeError::WriteStall),
        }
    }

    /// Whether a call currently has a live connection.
    pub fn is_connected(&self, call_id: &str) -> bool {
        self.connections.contains_key(call_id)
    }

    pub fn session_id(&self, call_id: &str) -> Option<String> {
        self.connections.get(call_id).map(|c| c.session_id.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close the connection for a call, sending a best-effort `call_end`.
    pub async fn disconnect_call(&self, call_id: &str, reason: &str) {
        let Some((_, connection)) = self.connections.remove(call_id) else {
            return;
        };

        let timestamp = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let frame = protocol::call_end_frame(call_id, reason, timestamp);
        {
            let mut sink = connection.sink.lock().await;
            // Close errors are expected when the peer is already gone.
            let _ = sink.send(Message::Text(frame.to_string())).await;
            let _ = sink.send(Message::Close(None)).await;
        }

        if let Some(reader) = connection.reader.lock().take() {
            reader.abort();
        }
        tracing::info!(call_id, reason, "disconnected AI session");
    }

    /// Start the shared heartbeat pinger. Two consecutive failed pings on
    /// a connection report heartbeat failure to its handler.
    pub fn start_heartbeat(&self) {
        let mut slot = self.heartbeat.lock();
        if slot.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }

        let connections = self.connections.clone();
        let interval = self.config.heartbeat_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let targets: Vec<Arc<Connection>> =
                    connections.iter().map(|e| e.value().clone()).collect();
                for connection in targets {
                    let ping = {
                        let mut sink = connection.sink.lock().await;
                        sink.send(Message::Ping(Vec::new())).await
                    };
                    match ping {
                        Ok(()) => {}
                        Err(e) => {
                            let failures =
                                connection.ping_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            tracing::warn!(
                                call_id = %connection.call_id,
                                failures,
                                error = %e,
                                "AI heartbeat ping failed"
                            );
                            if failures >= HEARTBEAT_FAILURE_LIMIT {
                                connection
                                    .handler
                                    .on_heartbeat_failed(&connection.call_id)
                                    .await;
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Stop the heartbeat and close every connection.
    pub async fn shutdown(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }
        let call_ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for call_id in call_ids {
            self.disconnect_call(&call_id, "bridge_shutdown").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingHandler {
        audio: PlMutex<Vec<Vec<u8>>>,
        controls: PlMutex<Vec<AiControl>>,
        disconnected: PlMutex<Vec<String>>,
    }

    #[async_trait]
    impl AiFrameHandler for RecordingHandler {
        async fn on_audio(&self, _call_id: &str, pcm: Vec<u8>) {
            self.audio.lock().push(pcm);
        }

        async fn on_control(&self, _call_id: &str, control: AiControl) {
            self.controls.lock().push(control);
        }

        async fn on_disconnected(&self, call_id: &str) {
            self.disconnected.lock().push(call_id.to_string());
        }

        async fn on_heartbeat_failed(&self, _call_id: &str) {}
    }

    fn call_info(call_id: &str) -> CallInfo {
        CallInfo {
            call_id: call_id.to_string(),
            from_number: "+1".to_string(),
            to_number: "+2".to_string(),
            direction: "inbound".to_string(),
            sip_headers: HashMap::new(),
            codec: "PCMU".to_string(),
            sample_rate: 8000,
        }
    }

    /// Minimal AI-platform stand-in: collects two frames, answers with a
    /// hangup, then closes.
    async fn spawn_server() -> (String, JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut frames = Vec::new();

            while frames.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        frames.push(serde_json::from_str(&text).unwrap());
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }

            let _ = ws
                .send(Message::Text(r#"{"type": "hangup"}"#.to_string()))
                .await;
            let _ = ws.send(Message::Close(None)).await;
            frames
        });

        (url, handle)
    }

    #[tokio::test]
    async fn handshake_audio_and_control_flow() {
        let (url, server) = spawn_server().await;
        let config = AiBridgeConfig::new(&url, "jwt-secret", "hmac-secret", "bridge-1");
        let manager = AiConnectionManager::new(config);
        let handler = Arc::new(RecordingHandler::default());

        let session_id = manager
            .connect_for_call(&call_info("c1"), handler.clone())
            .await
            .unwrap();
        assert!(!session_id.is_empty());
        assert!(manager.is_connected("c1"));

        manager.send_audio("c1", &[0u8; 320]).await.unwrap();

        let frames = server.await.unwrap();
        assert_eq!(frames.len(), 2);

        // First frame is auth with a real token and signature.
        assert_eq!(frames[0]["type"], "auth");
        let token = frames[0]["auth"]["token"].as_str().unwrap();
        assert!(token.starts_with("Bearer "));
        let claims =
            crate::auth::verify_token("jwt-secret", token.trim_start_matches("Bearer ")).unwrap();
        assert_eq!(claims.call_id, "c1");
        assert_eq!(frames[0]["call"]["from_number"], "+1");
        assert_eq!(frames[0]["auth"]["signature"].as_str().unwrap().len(), 64);

        // Second is the audio frame.
        assert_eq!(frames[1]["type"], "audio_data");

        // The server's hangup reaches the handler, then the close does.
        for _ in 0..50 {
            if !handler.controls.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.controls.lock().as_slice(), [AiControl::Hangup]);

        for _ in 0..50 {
            if !handler.disconnected.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.disconnected.lock().as_slice(), ["c1".to_string()]);
        assert!(!manager.is_connected("c1"));
    }

    #[tokio::test]
    async fn unreachable_platform_exhausts_retries() {
        // Nothing listens on this address; zero retries means one attempt.
        let mut config =
            AiBridgeConfig::new("ws://127.0.0.1:9", "jwt-secret", "hmac-secret", "bridge-1");
        config.max_retries = 0;
        let manager = AiConnectionManager::new(config);

        let result = manager
            .connect_for_call(&call_info("c1"), Arc::new(RecordingHandler::default()))
            .await;
        assert!(matches!(
            result,
            Err(AiBridgeError::Unreachable { attempts: 1 })
        ));
    }

    #[tokio::test]
    async fn sending_without_a_connection_fails() {
        let config =
            AiBridgeConfig::new("ws://127.0.0.1:9", "jwt-secret", "hmac-secret", "bridge-1");
        let manager = AiConnectionManager::new(config);
        assert!(matches!(
            manager.send_audio("ghost", &[0u8; 10]).await,
            Err(AiBridgeError::NotConnected(_))
        ));
    }
}
