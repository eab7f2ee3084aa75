//! The bridge: per-call pipeline orchestration.
//!
//! Media path for a connected call:
//!
//! ```text
//! RTP in -> jitter buffer -> G.711 decode -> in-band DTMF tap
//!        -> playout buffer -> 8->16 kHz resample -> base64 -> AI socket
//! AI audio_data -> base64 decode -> 16->8 kHz resample -> G.711 encode -> RTP out
//! ```
//!
//! Control: signaling events drive the call manager; AI control frames map
//! to session operations; DTMF events fan out to the IVR engine first and
//! the pattern processor otherwise. Cleanup runs off the call manager's
//! terminal-state observer so every path releases resources the same way.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use voxbridge_ai_bridge::{
    AiBridgeConfig, AiBridgeError, AiConnectionManager, AiControl, AiFrameHandler, CallInfo,
};
use voxbridge_audio_core as audio;
use voxbridge_call_engine::{
    CallManager, CallManagerConfig, CallObserver, CallSession, CallState, IncomingCallData,
    RoutingDecision,
};
use voxbridge_dtmf_core::{
    CallActions, DtmfEvent, DtmfProcessor, InbandDetector, InbandDetectorConfig, IvrEngine,
    MediaSink, MusicOnHoldManager, Rfc2833Decoder,
};
use voxbridge_infra_common::events::{topics, Event, EventBus};
use voxbridge_infra_common::{call_span, BridgeConfig};
use voxbridge_rtp_core::{AudioBuffer, RtpManager};
use voxbridge_signaling_core::{
    extract_number, SendResult, SignalingCommands, SignalingEvent, TransferMode,
};
use voxbridge_sms_core::{
    SmsActions, SmsManager, SmsManagerConfig, SmsMessage, SmsPriority, SmsProcessor,
    SmsSendResult, SmsTransport,
};

const PLAYOUT_FRAMES: usize = 10;
const PLAYOUT_DELAY: Duration = Duration::from_millis(60);
const PUMP_TICK: Duration = Duration::from_millis(20);

type PlayoutMap = Arc<DashMap<String, Arc<parking_lot::Mutex<AudioBuffer>>>>;

/// Sends locally generated audio (hold music, prompts) out the call's RTP
/// session in its negotiated codec.
struct RtpMediaSink {
    rtp: Arc<RtpManager>,
}

#[async_trait]
impl MediaSink for RtpMediaSink {
    async fn send_audio(&self, call_id: &str, pcm: &[u8]) -> bool {
        let Some(session) = self.rtp.get_session(call_id) else {
            return false;
        };
        let encoded = audio::convert(pcm, "PCM", session.codec());
        // A stopped session tells the feeder (hold music, prompts) to stop.
        session.send(&encoded).await.is_ok()
    }
}

/// Capability surface handed to the DTMF processor and IVR engine.
struct BridgeCallActions {
    call_manager: Arc<CallManager>,
    ai: Arc<AiConnectionManager>,
    signaling: Arc<dyn SignalingCommands>,
    ivr: OnceLock<Arc<IvrEngine>>,
}

#[async_trait]
impl CallActions for BridgeCallActions {
    async fn forward_to_ai(&self, call_id: &str, frame: Value) -> bool {
        self.ai.send_frame(call_id, frame).await.is_ok()
    }

    async fn transfer_call(&self, call_id: &str, target: &str) -> bool {
        if !self.call_manager.transfer_call(call_id, target).await {
            return false;
        }
        self.signaling
            .transfer(call_id, target, TransferMode::Blind)
            .await
            .is_ok()
    }

    async fn play_audio(&self, call_id: &str, audio_ref: &str) -> bool {
        self.signaling.play_audio(call_id, audio_ref).await.is_ok()
    }

    async fn hangup_call(&self, call_id: &str, reason: &str) -> bool {
        self.call_manager.hangup_call(call_id, reason).await
    }

    async fn toggle_recording(&self, call_id: &str) -> bool {
        match self.call_manager.get_call_session(call_id).await {
            Some(session) if session.recording => self.call_manager.stop_recording(call_id).await,
            Some(_) => self.call_manager.start_recording(call_id).await,
            None => false,
        }
    }

    async fn enter_ivr(&self, call_id: &str, menu_id: &str) -> bool {
        match self.ivr.get() {
            Some(ivr) => ivr.start_session(call_id, menu_id).await,
            None => false,
        }
    }
}

/// Inbound traffic from each call's AI socket.
struct BridgeAiHandler {
    call_manager: Arc<CallManager>,
    rtp: Arc<RtpManager>,
    moh: Arc<MusicOnHoldManager>,
    signaling: Arc<dyn SignalingCommands>,
    telephony_rate: u32,
    ai_rate: u32,
}

#[async_trait]
impl AiFrameHandler for BridgeAiHandler {
    async fn on_audio(&self, call_id: &str, pcm: Vec<u8>) {
        let Some(session) = self.rtp.get_session(call_id) else {
            return;
        };
        let narrowband = match audio::resample(&pcm, self.ai_rate, self.telephony_rate) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(call_id, error = %e, "dropping malformed AI audio");
                return;
            }
        };
        let encoded = audio::convert(&narrowband, "PCM", session.codec());
        if let Err(e) = session.send(&encoded).await {
            tracing::debug!(call_id, error = %e, "dropping AI audio for torn-down session");
        }
    }

    async fn on_control(&self, call_id: &str, control: AiControl) {
        match control {
            AiControl::Hangup => {
                self.call_manager.hangup_call(call_id, "ai_hangup").await;
            }
            AiControl::Transfer { target } => {
                if self.call_manager.transfer_call(call_id, &target).await {
                    let _ = self
                        .signaling
                        .transfer(call_id, &target, TransferMode::Blind)
                        .await;
                }
            }
            AiControl::Hold => {
                if self.call_manager.hold_call(call_id).await {
                    let _ = self.moh.start_hold_music(call_id, None).await;
                }
            }
            AiControl::Resume => {
                if self.call_manager.resume_call(call_id).await {
                    self.moh.stop_hold_music(call_id).await;
                }
            }
            AiControl::DtmfSend { digit } => {
                let _ = self.signaling.dtmf_send(call_id, &digit).await;
            }
            AiControl::Error { code, message } => {
                tracing::warn!(call_id, code, message, "error frame from AI");
            }
            AiControl::Audio(_) => {}
            AiControl::Other(frame_type) => {
                tracing::debug!(call_id, frame_type, "unhandled AI frame");
            }
        }
    }

    async fn on_disconnected(&self, call_id: &str) {
        if self.call_manager.get_call_session(call_id).await.is_some() {
            self.call_manager
                .hangup_call(call_id, "ai_disconnected error")
                .await;
        }
    }

    async fn on_heartbeat_failed(&self, call_id: &str) {
        tracing::warn!(call_id, "AI heartbeat failed twice, cleaning up call");
        self.call_manager
            .hangup_call(call_id, "Heartbeat failed")
            .await;
    }
}

/// Releases per-call resources when a session reaches a terminal state.
struct BridgeCleanup {
    rtp: Arc<RtpManager>,
    ai: Arc<AiConnectionManager>,
    moh: Arc<MusicOnHoldManager>,
    ivr: OnceLock<Arc<IvrEngine>>,
    processor: Arc<tokio::sync::Mutex<DtmfProcessor>>,
    rfc2833: Arc<parking_lot::Mutex<Rfc2833Decoder>>,
    inband: Arc<parking_lot::Mutex<InbandDetector>>,
    playout: PlayoutMap,
    signaling: Arc<dyn SignalingCommands>,
}

#[async_trait]
impl CallObserver for BridgeCleanup {
    async fn on_call_terminated(&self, session: &CallSession) {
        let call_id = &session.call_id;
        let reason = session.end_reason.as_deref().unwrap_or("call_end");

        // Release in reverse order of setup: AI socket first, media last.
        self.ai.disconnect_call(call_id, reason).await;
        if let Some(ivr) = self.ivr.get() {
            ivr.end_session(call_id, "call_ended").await;
        }
        self.moh.stop_hold_music(call_id).await;
        self.processor.lock().await.clear_call(call_id);
        self.rfc2833.lock().cleanup_call(call_id);
        self.inband.lock().cleanup_call(call_id);
        self.playout.remove(call_id);
        self.rtp.destroy_session(call_id).await;

        // Tell the SIP side unless the SIP side initiated the teardown.
        if reason != "sip_hangup" {
            let _ = self.signaling.hangup(call_id).await;
        }

        tracing::info!(call_id, reason, "call resources released");
    }
}

/// SIP MESSAGE transport over the signaling adapter.
struct SignalingSmsTransport {
    signaling: Arc<dyn SignalingCommands>,
}

#[async_trait]
impl SmsTransport for SignalingSmsTransport {
    async fn send_sip_message(
        &self,
        to_uri: &str,
        from_uri: &str,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> SmsSendResult {
        match self.signaling.send_message(to_uri, from_uri, body, headers).await {
            Ok(SendResult { success: true, .. }) => SmsSendResult::ok(),
            Ok(SendResult { error, .. }) => {
                SmsSendResult::failed(error.unwrap_or_else(|| "rejected".to_string()))
            }
            Err(e) => SmsSendResult::failed(e.to_string()),
        }
    }
}

/// Side effects requested by SMS processing rules.
struct BridgeSmsActions {
    sms: Arc<SmsManager>,
    ai: Arc<AiConnectionManager>,
    call_manager: Arc<CallManager>,
}

#[async_trait]
impl SmsActions for BridgeSmsActions {
    async fn forward_to_ai(&self, message: &SmsMessage, context: &Value) -> bool {
        // SMS tied to an active call rides that call's socket; otherwise the
        // bus event emitted at receive time is the hand-off point.
        if let Some(call_id) = message.sip_headers.get("X-Call-ID") {
            if self.ai.is_connected(call_id) {
                let frame = json!({
                    "type": "sms_message",
                    "data": {
                        "message_id": message.message_id,
                        "from_number": message.from_number,
                        "to_number": message.to_number,
                        "body": message.body,
                        "context": context,
                    }
                });
                return self.ai.send_frame(call_id, frame).await.is_ok();
            }
        }
        tracing::debug!(message_id = %message.message_id, "SMS forwarded via event bus only");
        true
    }

    async fn send_reply(&self, to_number: &str, from_number: &str, body: &str) -> bool {
        self.sms
            .send_sms(from_number, to_number, body, SmsPriority::Normal)
            .await
            .is_ok()
    }

    async fn forward_to_number(&self, message: &SmsMessage, target: &str) -> bool {
        self.sms
            .send_sms(&message.from_number, target, &message.body, SmsPriority::Normal)
            .await
            .is_ok()
    }

    async fn trigger_call(&self, from_number: &str, to_number: &str) -> bool {
        let call_id = format!("sms-call-{}", Uuid::new_v4());
        self.call_manager
            .initiate_outbound_call(&call_id, from_number, to_number)
            .await
            .is_some()
    }

    async fn store_message(&self, message: &SmsMessage) {
        // Persistence lives outside this process; the record already sits
        // in the SMS manager's in-memory map.
        tracing::info!(message_id = %message.message_id, "SMS stored");
    }
}

/// Aggregated runtime counters for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub uptime_seconds: u64,
    pub active_calls: usize,
    pub total_calls: u64,
    pub queued_calls: usize,
    pub rtp_sessions: usize,
    pub ai_connections: usize,
    pub moh_active: usize,
    pub ivr_active: usize,
    pub ivr_completed: u64,
    pub ivr_failed: u64,
    pub dtmf_patterns_matched: u64,
    pub sms_status_breakdown: HashMap<&'static str, usize>,
    pub events_emitted: u64,
}

/// The assembled voice bridge.
pub struct Bridge {
    config: BridgeConfig,
    events: Arc<EventBus>,
    call_manager: Arc<CallManager>,
    rtp: Arc<RtpManager>,
    ai: Arc<AiConnectionManager>,
    ai_handler: Arc<BridgeAiHandler>,
    moh: Arc<MusicOnHoldManager>,
    ivr: Arc<IvrEngine>,
    processor: Arc<tokio::sync::Mutex<DtmfProcessor>>,
    rfc2833: Arc<parking_lot::Mutex<Rfc2833Decoder>>,
    inband: Arc<parking_lot::Mutex<InbandDetector>>,
    sms: Arc<SmsManager>,
    sms_processor: Arc<tokio::sync::Mutex<SmsProcessor>>,
    signaling: Arc<dyn SignalingCommands>,
    playout: PlayoutMap,
    dtmf_tx: mpsc::UnboundedSender<DtmfEvent>,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl Bridge {
    pub fn new(config: BridgeConfig, signaling: Arc<dyn SignalingCommands>) -> Arc<Self> {
        let events = Arc::new(EventBus::new());

        let call_manager = Arc::new(CallManager::new(
            CallManagerConfig {
                max_concurrent_calls: config.limits.max_concurrent_calls,
                max_calls_per_number: config.limits.max_calls_per_number,
                max_queue_size: config.limits.max_queue_size,
                queued_call_timeout: Duration::from_secs(config.timings.queued_call_timeout_s),
                stale_call_max_age: Duration::from_secs(config.timings.stale_call_max_age_s),
            },
            events.clone(),
        ));

        let rtp = Arc::new(RtpManager::new(config.network.rtp_port_range));

        let mut ai_config = AiBridgeConfig::new(
            &config.network.ai_platform_url,
            &config.security.jwt_secret,
            &config.security.hmac_secret,
            &config.security.instance_id,
        );
        ai_config.max_retries = config.timings.ai_max_retries;
        ai_config.heartbeat_interval = Duration::from_secs(config.timings.ai_heartbeat_s);
        let ai = Arc::new(AiConnectionManager::new(ai_config));

        let media_sink: Arc<dyn MediaSink> = Arc::new(RtpMediaSink { rtp: rtp.clone() });
        let moh = Arc::new(MusicOnHoldManager::new(
            media_sink.clone(),
            config.audio.sample_rate,
            config.frame_bytes(),
        ));

        let actions = Arc::new(BridgeCallActions {
            call_manager: call_manager.clone(),
            ai: ai.clone(),
            signaling: signaling.clone(),
            ivr: OnceLock::new(),
        });
        let ivr = IvrEngine::new(
            actions.clone(),
            media_sink,
            config.audio.sample_rate,
            Duration::from_secs(config.timings.ivr_session_timeout_s),
        );
        let _ = actions.ivr.set(ivr.clone());

        let processor = Arc::new(tokio::sync::Mutex::new(DtmfProcessor::new(
            actions.clone(),
            Duration::from_secs(config.timings.dtmf_sequence_timeout_s),
        )));
        let rfc2833 = Arc::new(parking_lot::Mutex::new(Rfc2833Decoder::new()));
        let inband = Arc::new(parking_lot::Mutex::new(InbandDetector::new(
            InbandDetectorConfig {
                sample_rate: config.audio.sample_rate,
                frame_size: (config.audio.sample_rate / 1000 * config.audio.frame_ms) as usize,
                ..Default::default()
            },
        )));

        let sms = SmsManager::new(
            SmsManagerConfig {
                queue_max: config.limits.sms_queue_max,
                global_rate_per_min: config.limits.sms_global_rate_per_min,
                per_number_rate_per_min: config.limits.sms_per_number_rate_per_min,
                expiry: Duration::from_secs(config.timings.sms_expiry_h * 3600),
                retry_interval: Duration::from_secs(config.timings.sms_retry_interval_s),
                delivery_timeout: Duration::from_secs(config.timings.sms_delivery_timeout_s),
                ..Default::default()
            },
            Arc::new(SignalingSmsTransport {
                signaling: signaling.clone(),
            }),
            events.clone(),
        );
        let sms_processor = Arc::new(tokio::sync::Mutex::new(SmsProcessor::new(Arc::new(
            BridgeSmsActions {
                sms: sms.clone(),
                ai: ai.clone(),
                call_manager: call_manager.clone(),
            },
        ))));

        let playout: PlayoutMap = Arc::new(DashMap::new());

        let ai_handler = Arc::new(BridgeAiHandler {
            call_manager: call_manager.clone(),
            rtp: rtp.clone(),
            moh: moh.clone(),
            signaling: signaling.clone(),
            telephony_rate: config.audio.sample_rate,
            ai_rate: config.audio.ai_sample_rate,
        });

        let cleanup = Arc::new(BridgeCleanup {
            rtp: rtp.clone(),
            ai: ai.clone(),
            moh: moh.clone(),
            ivr: {
                let lock = OnceLock::new();
                let _ = lock.set(ivr.clone());
                lock
            },
            processor: processor.clone(),
            rfc2833: rfc2833.clone(),
            inband: inband.clone(),
            playout: playout.clone(),
            signaling: signaling.clone(),
        });
        call_manager.add_observer(cleanup);

        let (dtmf_tx, dtmf_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let bridge = Arc::new(Self {
            config,
            events,
            call_manager,
            rtp,
            ai,
            ai_handler,
            moh,
            ivr,
            processor,
            rfc2833,
            inband,
            sms,
            sms_processor,
            signaling,
            playout,
            dtmf_tx,
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
            started_at: Instant::now(),
        });

        bridge.spawn_dtmf_dispatch(dtmf_rx);
        bridge
    }

    /// Start the background machinery: heartbeat, SMS worker, sweepers.
    pub fn start(&self) {
        self.ai.start_heartbeat();
        self.sms.start_worker();

        let mut tasks = self.tasks.lock();

        // DTMF sequence sweeper, 30 s.
        tasks.push(self.spawn_interval(Duration::from_secs(30), {
            let processor = self.processor.clone();
            move || {
                let processor = processor.clone();
                async move {
                    processor.lock().await.sweep_expired(Instant::now());
                }
            }
        }));

        // IVR session sweeper, 60 s.
        tasks.push(self.spawn_interval(Duration::from_secs(60), {
            let ivr = self.ivr.clone();
            move || {
                let ivr = ivr.clone();
                async move {
                    ivr.sweep_expired(Instant::now()).await;
                }
            }
        }));

        // Queued-call admission sweeper, 60 s.
        tasks.push(self.spawn_interval(Duration::from_secs(60), {
            let call_manager = self.call_manager.clone();
            move || {
                let call_manager = call_manager.clone();
                async move {
                    call_manager.sweep_queue(Instant::now()).await;
                }
            }
        }));

        // Stale-call sweeper, 5 min.
        tasks.push(self.spawn_interval(
            Duration::from_secs(self.config.timings.stale_call_sweep_s),
            {
                let call_manager = self.call_manager.clone();
                move || {
                    let call_manager = call_manager.clone();
                    async move {
                        call_manager.sweep_stale(Instant::now()).await;
                    }
                }
            },
        ));

        // SMS expiry + conversation sweeper, 5 min.
        tasks.push(self.spawn_interval(Duration::from_secs(300), {
            let sms = self.sms.clone();
            let sms_processor = self.sms_processor.clone();
            move || {
                let sms = sms.clone();
                let sms_processor = sms_processor.clone();
                async move {
                    sms.sweep_expired(Instant::now()).await;
                    sms_processor.lock().await.sweep_conversations(Instant::now());
                }
            }
        }));

        tracing::info!("bridge started");
    }

    fn spawn_interval<F, Fut>(&self, period: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
        })
    }

    fn spawn_dtmf_dispatch(&self, mut rx: mpsc::UnboundedReceiver<DtmfEvent>) {
        let events = self.events.clone();
        let ivr = self.ivr.clone();
        let processor = self.processor.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let span = call_span(&event.call_id);
                async {
                    events
                        .emit(Event::for_call(
                            topics::DTMF_RECEIVED,
                            event.call_id.clone(),
                            json!({
                                "digit": event.digit.to_string(),
                                "method": event.method.as_str(),
                                "duration_ms": event.duration_ms,
                                "confidence": event.confidence,
                            }),
                        ))
                        .await;

                    // An active IVR session consumes the digit; otherwise
                    // the pattern processor sees it.
                    if ivr.handle_digit(&event.call_id, event.digit).await {
                        return;
                    }
                    processor.lock().await.process_event(&event).await;
                }
                .instrument(span)
                .await;
            }
        });
        self.tasks.lock().push(task);
    }

    /// Entry point for everything the signaling plane reports.
    pub async fn handle_signaling_event(&self, event: SignalingEvent) {
        match event {
            SignalingEvent::CallStart {
                call_id,
                from_number,
                to_number,
                sip_headers,
                codec,
                remote_rtp_host,
                remote_rtp_port,
            } => {
                let mut data = IncomingCallData::new(&call_id, &from_number, &to_number);
                data.sip_headers = sip_headers;
                data.codec = codec;
                data.remote_rtp_host = remote_rtp_host;
                data.remote_rtp_port = remote_rtp_port;
                self.handle_call_start(data).await;
            }
            SignalingEvent::CallAnswer { call_id } => {
                self.call_manager
                    .update_call_state(&call_id, CallState::Connecting)
                    .await;
                self.call_manager
                    .update_call_state(&call_id, CallState::Connected)
                    .await;
            }
            SignalingEvent::CallEnd { call_id, reason } => {
                let reason = reason.unwrap_or_else(|| "sip_hangup".to_string());
                self.call_manager.hangup_call(&call_id, &reason).await;
            }
            SignalingEvent::CallHold { call_id } => {
                if self.call_manager.hold_call(&call_id).await {
                    let _ = self.moh.start_hold_music(&call_id, None).await;
                }
            }
            SignalingEvent::CallResume { call_id } => {
                if self.call_manager.resume_call(&call_id).await {
                    self.moh.stop_hold_music(&call_id).await;
                }
            }
            SignalingEvent::DtmfInfo { call_id, digit } => {
                if let Some(digit) = digit.chars().next() {
                    let _ = self.dtmf_tx.send(DtmfEvent::sip_info(call_id, digit));
                }
            }
            SignalingEvent::RtpPacket { call_id, data } => {
                let Ok(bytes) = BASE64.decode(&data) else {
                    tracing::debug!(call_id, "undecodable relayed RTP packet");
                    return;
                };
                if let Some(session) = self.rtp.get_session(&call_id) {
                    session.inject_packet(&bytes);
                }
            }
            SignalingEvent::SmsMessage {
                from_uri,
                to_uri,
                body,
                headers,
                call_id,
            } => {
                self.handle_sms_message(from_uri, to_uri, body, headers, call_id)
                    .await;
            }
        }
    }

    /// Admission plus the per-call pipeline setup for accepted calls.
    /// Returns the routing decision for the signaling plane.
    pub async fn handle_call_start(&self, data: IncomingCallData) -> RoutingDecision {
        let call_id = data.call_id.clone();
        let codec = data.codec.clone().unwrap_or_else(|| "PCMU".to_string());
        let remote_host = data
            .remote_rtp_host
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let remote_port = data.remote_rtp_port.unwrap_or(5004);
        let from_number = data.from_number.clone();
        let to_number = data.to_number.clone();
        let sip_headers = data.sip_headers.clone();

        let decision = self.call_manager.handle_incoming_call(data).await;

        match &decision {
            RoutingDecision::Reject { reason } => {
                tracing::info!(call_id, reason, "call rejected");
                let _ = self.signaling.hangup(&call_id).await;
                return decision;
            }
            RoutingDecision::Queue { name, .. } => {
                tracing::info!(call_id, queue = %name, "call queued");
                return decision;
            }
            RoutingDecision::Forward { target, .. } => {
                tracing::info!(call_id, target = %target, "call forwarded by rule");
                let _ = self
                    .signaling
                    .transfer(&call_id, target, TransferMode::Blind)
                    .await;
                return decision;
            }
            RoutingDecision::Accept => {}
        }

        if let Err(e) = self
            .setup_media_path(&call_id, &codec, &remote_host, remote_port)
            .await
        {
            tracing::error!(call_id, error = %e, "failed to set up media path");
            self.call_manager
                .hangup_call(&call_id, "media_setup error")
                .await;
            return decision;
        }

        let call_info = CallInfo {
            call_id: call_id.clone(),
            from_number,
            to_number,
            direction: "incoming".to_string(),
            sip_headers,
            codec,
            sample_rate: self.config.audio.sample_rate,
        };
        match self
            .ai
            .connect_for_call(&call_info, self.ai_handler.clone())
            .await
        {
            Ok(session_id) => {
                self.call_manager.set_ai_session(&call_id, &session_id).await;
                self.spawn_ai_pump(call_id);
            }
            Err(e) => {
                tracing::error!(call_id, error = %e, "AI platform unreachable");
                self.call_manager
                    .hangup_call(&call_id, "ai_unreachable error")
                    .await;
            }
        }

        decision
    }

    async fn setup_media_path(
        &self,
        call_id: &str,
        codec: &str,
        remote_host: &str,
        remote_port: u16,
    ) -> anyhow::Result<()> {
        let remote_addr = format!("{remote_host}:{remote_port}").parse()?;

        let audio_sink = {
            let call_id = call_id.to_string();
            let codec = codec.to_string();
            let inband = self.inband.clone();
            let playout = self.playout.clone();
            let dtmf_tx = self.dtmf_tx.clone();
            Arc::new(move |payload: bytes::Bytes| {
                let pcm = audio::convert(&payload, &codec, "PCM");
                let now = Instant::now();
                for event in inband.lock().process_audio(&call_id, &pcm, now) {
                    let _ = dtmf_tx.send(event);
                }
                if let Some(buffer) = playout.get(&call_id) {
                    buffer.lock().push_frame(pcm, now);
                }
            }) as Arc<dyn Fn(bytes::Bytes) + Send + Sync>
        };

        let event_sink = {
            let call_id = call_id.to_string();
            let rfc2833 = self.rfc2833.clone();
            let dtmf_tx = self.dtmf_tx.clone();
            Arc::new(move |payload: bytes::Bytes| {
                if let Some(event) =
                    rfc2833
                        .lock()
                        .process_payload(&call_id, &payload, Instant::now())
                {
                    let _ = dtmf_tx.send(event);
                }
            }) as Arc<dyn Fn(bytes::Bytes) + Send + Sync>
        };

        self.playout.insert(
            call_id.to_string(),
            Arc::new(parking_lot::Mutex::new(AudioBuffer::new(
                PLAYOUT_FRAMES,
                PLAYOUT_DELAY,
            ))),
        );

        let session = self
            .rtp
            .create_session(call_id, remote_addr, codec, audio_sink, Some(event_sink))
            .await?;
        self.call_manager
            .set_media_binding(call_id, session.local_port(), remote_host, remote_port)
            .await;
        Ok(())
    }

    /// Per-call task moving playout-released frames to the AI socket.
    fn spawn_ai_pump(&self, call_id: String) {
        let playout = self.playout.clone();
        let ai = self.ai.clone();
        let call_manager = self.call_manager.clone();
        let telephony_rate = self.config.audio.sample_rate;
        let ai_rate = self.config.audio.ai_sample_rate;
        let mut shutdown = self.shutdown_tx.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PUMP_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let Some(buffer) = playout.get(&call_id) else {
                            // Cleanup removed the buffer: the call is gone.
                            break;
                        };
                        let frames = buffer.lock().drain_ready(Instant::now());
                        drop(buffer);

                        for frame in frames {
                            let wideband = match audio::resample(&frame, telephony_rate, ai_rate) {
                                Ok(data) => data,
                                Err(_) => frame.clone(),
                            };
                            match ai.send_audio(&call_id, &wideband).await {
                                Ok(()) => {}
                                Err(AiBridgeError::WriteStall) => {
                                    tracing::error!(call_id = %call_id, "AI write stalled, failing call");
                                    call_manager
                                        .hangup_call(&call_id, "ai_write_stall error")
                                        .await;
                                    return;
                                }
                                Err(AiBridgeError::NotConnected(_)) => {}
                                Err(e) => {
                                    tracing::debug!(call_id = %call_id, error = %e, "AI audio send failed");
                                }
                            }
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(task);
    }

    async fn handle_sms_message(
        &self,
        from_uri: String,
        to_uri: String,
        body: String,
        headers: HashMap<String, String>,
        call_id: Option<String>,
    ) {
        if SmsManager::is_delivery_report(&headers, &body) {
            if let Some(original) = self.sms.process_delivery_report(&headers, &body).await {
                tracing::info!(original_id = %original, "applied SMS delivery report");
            }
            return;
        }

        let from_number = extract_number(&from_uri);
        let to_number = extract_number(&to_uri);

        let mut sip_headers = headers;
        if let Some(call_id) = call_id {
            sip_headers.insert("X-Call-ID".to_string(), call_id);
        }

        let message = self
            .sms
            .receive_sms(&from_number, &to_number, &body, sip_headers)
            .await;
        let outcome = self
            .sms_processor
            .lock()
            .await
            .process_inbound(&message, Instant::now())
            .await;
        tracing::info!(
            message_id = %message.message_id,
            action = %outcome.action,
            "inbound SMS processed"
        );
    }

    /// Send an SMS from this bridge.
    pub async fn send_sms(
        &self,
        from_number: &str,
        to_number: &str,
        body: &str,
        priority: SmsPriority,
    ) -> voxbridge_sms_core::Result<String> {
        self.sms.send_sms(from_number, to_number, body, priority).await
    }

    /// Transfer a connected call (blind or attended).
    pub async fn transfer_call(&self, call_id: &str, target: &str, mode: TransferMode) -> bool {
        if !self.call_manager.transfer_call(call_id, target).await {
            return false;
        }
        self.signaling
            .transfer(call_id, target, mode)
            .await
            .is_ok()
    }

    /// Stop every loop and release all per-call resources.
    pub async fn shutdown(&self) {
        tracing::info!("bridge shutting down");
        let _ = self.shutdown_tx.send(true);

        for call_id in self.call_manager.list_active_calls().await {
            self.call_manager
                .hangup_call(&call_id, "bridge_shutdown")
                .await;
        }

        self.sms.shutdown().await;
        self.moh.shutdown().await;
        self.ai.shutdown().await;
        self.rtp.cleanup_all().await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
    }

    /// Aggregated counters.
    pub async fn stats(&self) -> BridgeStats {
        BridgeStats {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_calls: self.call_manager.active_call_count().await,
            total_calls: self.call_manager.total_calls().await,
            queued_calls: self.call_manager.queued_call_count(),
            rtp_sessions: self.rtp.session_count(),
            ai_connections: self.ai.connection_count(),
            moh_active: self.moh.active_session_count().await,
            ivr_active: self.ivr.active_session_count().await,
            ivr_completed: self.ivr.completed_session_count(),
            ivr_failed: self.ivr.failed_session_count(),
            dtmf_patterns_matched: self.processor.lock().await.matched_pattern_count(),
            sms_status_breakdown: self.sms.status_breakdown(),
            events_emitted: self.events.emitted_count(),
        }
    }

    // Component accessors used by the binary and integration tests.

    pub fn call_manager(&self) -> &Arc<CallManager> {
        &self.call_manager
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn ivr(&self) -> &Arc<IvrEngine> {
        &self.ivr
    }

    pub fn dtmf_processor(&self) -> &Arc<tokio::sync::Mutex<DtmfProcessor>> {
        &self.processor
    }

    pub fn moh(&self) -> &Arc<MusicOnHoldManager> {
        &self.moh
    }

    pub fn sms(&self) -> &Arc<SmsManager> {
        &self.sms
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}
