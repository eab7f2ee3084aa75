//! Per-call RTP session.
//!
//! Owns the UDP socket, a receive loop that feeds the jitter buffer (or the
//! telephony-event sink for RFC 2833 payloads), and a 20 ms playout loop
//! that hands released payloads to the media pipeline. A receive error ends
//! the loop; a send error drops the packet and logs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, RtpError};
use crate::jitter::{JitterBuffer, JitterBufferConfig};
use crate::packet::{payload_type_for_codec, RtpHeader, RtpPacket};
use crate::stats::RtpStatistics;

const PLAYOUT_INTERVAL: Duration = Duration::from_millis(20);
const RECV_BUFFER: usize = 1500;

/// Receives payload bytes released from this session.
pub type PayloadSink = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Session parameters fixed at creation.
#[derive(Debug, Clone)]
pub struct RtpSessionConfig {
    pub local_port: u16,
    pub remote_addr: SocketAddr,
    /// Negotiated codec name; determines the outbound payload type.
    pub codec: String,
    /// Payload type carrying RFC 2833 telephony events.
    pub telephony_event_payload_type: u8,
    pub jitter: JitterBufferConfig,
}

impl RtpSessionConfig {
    pub fn new(local_port: u16, remote_addr: SocketAddr, codec: impl Into<String>) -> Self {
        Self {
            local_port,
            remote_addr,
            codec: codec.into(),
            telephony_event_payload_type: 101,
            jitter: JitterBufferConfig::default(),
        }
    }
}

struct SendState {
    sequence: u16,
    timestamp: u32,
}

/// A running RTP session for one call.
pub struct RtpSession {
    config: RtpSessionConfig,
    payload_type: u8,
    ssrc: u32,
    socket: Arc<UdpSocket>,
    send_state: Mutex<SendState>,
    jitter: Arc<Mutex<JitterBuffer>>,
    stats: Arc<Mutex<RtpStatistics>>,
    event_sink: Option<PayloadSink>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RtpSession {
    /// Bind the socket and start the receive and playout loops.
    ///
    /// `audio_sink` receives in-order audio payloads released by the jitter
    /// buffer; `event_sink`, when present, receives raw telephony-event
    /// payloads as they arrive (unordered, undeduplicated).
    pub async fn start(
        config: RtpSessionConfig,
        audio_sink: PayloadSink,
        event_sink: Option<PayloadSink>,
    ) -> Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", config.local_port)).await?);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = Arc::new(Self {
            payload_type: payload_type_for_codec(&config.codec),
            ssrc: rand::random::<u32>(),
            socket,
            send_state: Mutex::new(SendState {
                sequence: 0,
                timestamp: 0,
            }),
            jitter: Arc::new(Mutex::new(JitterBuffer::new(config.jitter.clone()))),
            stats: Arc::new(Mutex::new(RtpStatistics::new())),
            event_sink: event_sink.clone(),
            running: AtomicBool::new(true),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            config,
        });

        let receive = tokio::spawn(Self::receive_loop(
            session.socket.clone(),
            session.jitter.clone(),
            session.stats.clone(),
            session.config.telephony_event_payload_type,
            event_sink,
            shutdown_rx.clone(),
        ));
        let playout = tokio::spawn(Self::playout_loop(
            session.jitter.clone(),
            audio_sink,
            shutdown_rx,
        ));
        session.tasks.lock().extend([receive, playout]);

        tracing::info!(port = session.config.local_port, "RTP session started");
        Ok(session)
    }

    async fn receive_loop(
        socket: Arc<UdpSocket>,
        jitter: Arc<Mutex<JitterBuffer>>,
        stats: Arc<Mutex<RtpStatistics>>,
        event_payload_type: u8,
        event_sink: Option<PayloadSink>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buf) => {
                    let len = match received {
                        Ok((len, _addr)) => len,
                        Err(e) => {
                            // Socket closed or unrecoverable; end the loop.
                            tracing::debug!(error = %e, "RTP receive loop terminating");
                            break;
                        }
                    };

                    match RtpPacket::parse(&buf[..len]) {
                        Ok(packet) => {
                            if packet.header.payload_type == event_payload_type {
                                if let Some(sink) = &event_sink {
                                    sink(packet.payload.clone());
                                }
                                continue;
                            }
                            let now = Instant::now();
                            stats.lock().record_received(&packet, now);
                            jitter.lock().insert(packet, now);
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "dropping malformed RTP packet");
                        }
                    }
                }
            }
        }
    }

    async fn playout_loop(
        jitter: Arc<Mutex<JitterBuffer>>,
        audio_sink: PayloadSink,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(PLAYOUT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    loop {
                        let packet = jitter.lock().next_ready(Instant::now());
                        match packet {
                            Some(p) => audio_sink(p.payload),
                            None => break,
                        }
                    }
                }
            }
        }
    }

    /// Send one audio payload to the remote endpoint.
    ///
    /// The sequence number wraps at 16 bits; the timestamp advances by the
    /// payload sample count (one byte per sample for G.711). A socket
    /// error drops the packet and logs; sending on a stopped session is an
    /// error so stale feeders (hold music, the AI path) can detach.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RtpError::SessionStopped(self.config.local_port));
        }

        let header = {
            let mut state = self.send_state.lock();
            let header = RtpHeader {
                version: 2,
                padding: false,
                extension: false,
                csrc_count: 0,
                marker: false,
                payload_type: self.payload_type,
                sequence_number: state.sequence,
                timestamp: state.timestamp,
                ssrc: self.ssrc,
            };
            state.sequence = state.sequence.wrapping_add(1);
            state.timestamp = state.timestamp.wrapping_add(payload.len() as u32);
            header
        };

        let packet = RtpPacket {
            header,
            payload: Bytes::copy_from_slice(payload),
        };
        let data = packet.pack();

        match self.socket.send_to(&data, self.config.remote_addr).await {
            Ok(_) => self.stats.lock().record_sent(data.len()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to send RTP packet, dropping");
            }
        }
        Ok(())
    }

    /// Feed a packet that arrived through the signaling adapter instead of
    /// our own socket. Routed exactly like a received datagram.
    pub fn inject_packet(&self, data: &[u8]) {
        match RtpPacket::parse(data) {
            Ok(packet) => {
                if packet.header.payload_type == self.config.telephony_event_payload_type {
                    if let Some(sink) = &self.event_sink {
                        sink(packet.payload.clone());
                    }
                    return;
                }
                let now = Instant::now();
                self.stats.lock().record_received(&packet, now);
                self.jitter.lock().insert(packet, now);
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed relayed RTP packet");
            }
        }
    }

    /// Stop both loops and clear the jitter buffer.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.jitter.lock().clear();
        tracing::info!(port = self.config.local_port, "RTP session stopped");
    }

    pub fn local_port(&self) -> u16 {
        self.config.local_port
    }

    pub fn codec(&self) -> &str {
        &self.config.codec
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Snapshot of the session counters.
    pub fn stats_snapshot(&self) -> (u64, u64, u64, u64, u64, f64) {
        let stats = self.stats.lock();
        (
            stats.packets_sent,
            stats.packets_received,
            stats.bytes_sent,
            stats.bytes_received,
            stats.packets_lost,
            stats.jitter_ms,
        )
    }
}
