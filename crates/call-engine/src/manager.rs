//! The call manager: admission, state transitions, and cleanup.
//!
//! All session state lives behind one async mutex, which is what serializes
//! concurrent `update_call_state` calls on the same call. Events and
//! observer notifications always fire after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;
use tokio::sync::Mutex;

use voxbridge_infra_common::events::{topics, Event, EventBus};

use crate::queue::CallQueue;
use crate::router::{CallRouter, RoutingDecision};
use crate::types::{CallDirection, CallPriority, CallSession, CallState, Party};

/// Data the signaling plane supplies with a new inbound call.
#[derive(Debug, Clone)]
pub struct IncomingCallData {
    pub call_id: String,
    pub from_number: String,
    pub to_number: String,
    pub sip_headers: HashMap<String, String>,
    pub codec: Option<String>,
    pub remote_rtp_host: Option<String>,
    pub remote_rtp_port: Option<u16>,
    pub priority: CallPriority,
}

impl IncomingCallData {
    pub fn new(call_id: &str, from_number: &str, to_number: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            from_number: from_number.to_string(),
            to_number: to_number.to_string(),
            sip_headers: HashMap::new(),
            codec: None,
            remote_rtp_host: None,
            remote_rtp_port: None,
            priority: CallPriority::Normal,
        }
    }
}

/// Hooks invoked on lifecycle changes. The bridge uses these to keep the
/// signaling plane in sync and to tear down per-call resources.
#[async_trait]
pub trait CallObserver: Send + Sync {
    async fn on_state_changed(
        &self,
        _session: &CallSession,
        _old_state: CallState,
        _new_state: CallState,
    ) {
    }

    /// Called exactly once when a session reaches a terminal state.
    async fn on_call_terminated(&self, _session: &CallSession) {}
}

/// Manager limits.
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    pub max_concurrent_calls: usize,
    pub max_calls_per_number: usize,
    pub max_queue_size: usize,
    pub queued_call_timeout: Duration,
    pub stale_call_max_age: Duration,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 100,
            max_calls_per_number: 3,
            max_queue_size: 50,
            queued_call_timeout: Duration::from_secs(300),
            stale_call_max_age: Duration::from_secs(14400),
        }
    }
}

#[derive(Default)]
struct ManagerState {
    active: HashMap<String, CallSession>,
    number_counts: HashMap<String, usize>,
    total_calls: u64,
}

/// Exclusive owner of every call session.
pub struct CallManager {
    config: CallManagerConfig,
    state: Mutex<ManagerState>,
    pub router: parking_lot::RwLock<CallRouter>,
    queue: parking_lot::Mutex<CallQueue>,
    events: Arc<EventBus>,
    observers: parking_lot::RwLock<Vec<Arc<dyn CallObserver>>>,
}

impl CallManager {
    pub fn new(config: CallManagerConfig, events: Arc<EventBus>) -> Self {
        let queue = CallQueue::new(config.max_queue_size, config.queued_call_timeout);
        Self {
            config,
            state: Mutex::new(ManagerState::default()),
            router: parking_lot::RwLock::new(CallRouter::new()),
            queue: parking_lot::Mutex::new(queue),
            events,
            observers: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn CallObserver>) {
        self.observers.write().push(observer);
    }

    /// Admit (or reject/queue) an inbound call.
    pub async fn handle_incoming_call(&self, data: IncomingCallData) -> RoutingDecision {
        if data.call_id.is_empty() || data.from_number.is_empty() || data.to_number.is_empty() {
            return RoutingDecision::Reject {
                reason: "invalid_request".to_string(),
            };
        }

        let mut session = CallSession::new(
            data.call_id.clone(),
            Party::new(data.from_number.clone()),
            Party::new(data.to_number),
            CallDirection::Inbound,
        );
        session.priority = data.priority;
        session.sip_headers = data.sip_headers;
        session.rtp_remote_host = data.remote_rtp_host;
        session.rtp_remote_port = data.remote_rtp_port;
        if let Some(codec) = data.codec {
            session.codec = codec;
        }

        let decision = {
            let mut state = self.state.lock().await;

            if state.active.contains_key(&data.call_id) {
                return RoutingDecision::Reject {
                    reason: "duplicate_call_id".to_string(),
                };
            }
            if state.active.len() >= self.config.max_concurrent_calls {
                return RoutingDecision::Reject {
                    reason: "max_concurrent_calls_reached".to_string(),
                };
            }
            let per_number = state
                .number_counts
                .get(&data.from_number)
                .copied()
                .unwrap_or(0);
            if per_number >= self.config.max_calls_per_number {
                return RoutingDecision::Reject {
                    reason: "per_number_limit_reached".to_string(),
                };
            }

            let decision = self.router.read().route(&session, Local::now());

            match &decision {
                RoutingDecision::Reject { .. } => return decision,
                RoutingDecision::Queue { priority, .. } => {
                    session.priority = *priority;
                    let queued = self.queue.lock().add_call(session, Instant::now());
                    if !queued {
                        return RoutingDecision::Reject {
                            reason: "queue_full".to_string(),
                        };
                    }
                    return decision;
                }
                RoutingDecision::Accept | RoutingDecision::Forward { .. } => {
                    session.state = CallState::Ringing;
                    session.ring_start = Some(Instant::now());
                    *state
                        .number_counts
                        .entry(session.caller.number.clone())
                        .or_insert(0) += 1;
                    state.total_calls += 1;
                    state.active.insert(session.call_id.clone(), session.clone());
                }
            }
            decision
        };

        self.events
            .emit(Event::for_call(
                topics::CALL_CREATED,
                session.call_id.clone(),
                json!({
                    "from": session.caller.number,
                    "to": session.callee.number,
                    "direction": "inbound",
                    "codec": session.codec,
                }),
            ))
            .await;
        self.notify_state_changed(&session, CallState::Initializing, CallState::Ringing)
            .await;

        decision
    }

    /// Create a session for an outbound call in `Initializing`.
    pub async fn initiate_outbound_call(
        &self,
        call_id: &str,
        from_number: &str,
        to_number: &str,
    ) -> Option<CallSession> {
        let session = CallSession::new(
            call_id,
            Party::new(from_number),
            Party::new(to_number),
            CallDirection::Outbound,
        );

        {
            let mut state = self.state.lock().await;
            if state.active.contains_key(call_id)
                || state.active.len() >= self.config.max_concurrent_calls
            {
                return None;
            }
            *state
                .number_counts
                .entry(from_number.to_string())
                .or_insert(0) += 1;
            state.total_calls += 1;
            state.active.insert(call_id.to_string(), session.clone());
        }

        self.events
            .emit(Event::for_call(
                topics::CALL_CREATED,
                call_id,
                json!({
                    "from": from_number,
                    "to": to_number,
                    "direction": "outbound",
                }),
            ))
            .await;

        Some(session)
    }

    /// Apply a state transition. Returns false (no state change) for an
    /// unknown call or a transition outside the table.
    pub async fn update_call_state(&self, call_id: &str, new_state: CallState) -> bool {
        self.transition(call_id, new_state, None, |_| {}).await
    }

    /// Like [`update_call_state`](Self::update_call_state) but records the
    /// extras (a transfer target, an end reason) on the session first.
    pub async fn update_call_state_with_extras(
        &self,
        call_id: &str,
        new_state: CallState,
        transfer_target: Option<String>,
        reason: Option<String>,
    ) -> bool {
        self.transition(call_id, new_state, reason, move |session| {
            if transfer_target.is_some() {
                session.transfer_target = transfer_target;
            }
        })
        .await
    }

    /// Transfer a connected call: records the target and moves to
    /// `Transferring`.
    pub async fn transfer_call(&self, call_id: &str, target: &str) -> bool {
        let target = target.to_string();
        self.transition(call_id, CallState::Transferring, None, move |session| {
            session.transfer_target = Some(target);
        })
        .await
    }

    /// Put a connected call on hold.
    pub async fn hold_call(&self, call_id: &str) -> bool {
        self.transition(call_id, CallState::OnHold, None, |session| {
            session.on_hold = true;
        })
        .await
    }

    /// Resume a held call.
    pub async fn resume_call(&self, call_id: &str) -> bool {
        {
            let state = self.state.lock().await;
            match state.active.get(call_id) {
                Some(session) if session.state == CallState::OnHold => {}
                _ => return false,
            }
        }
        self.transition(call_id, CallState::Connected, None, |session| {
            session.on_hold = false;
        })
        .await
    }

    pub async fn start_recording(&self, call_id: &str) -> bool {
        self.set_recording(call_id, true).await
    }

    pub async fn stop_recording(&self, call_id: &str) -> bool {
        self.set_recording(call_id, false).await
    }

    async fn set_recording(&self, call_id: &str, recording: bool) -> bool {
        let mut state = self.state.lock().await;
        match state.active.get_mut(call_id) {
            Some(session) if !session.state.is_terminal() => {
                session.recording = recording;
                true
            }
            _ => false,
        }
    }

    /// End a call from any non-terminal state.
    ///
    /// Reasons that indicate an error land in `Failed`; otherwise connected
    /// calls complete and never-connected calls are cancelled, keeping every
    /// executed transition inside the table.
    pub async fn hangup_call(&self, call_id: &str, reason: &str) -> bool {
        let error = reason.contains("error") || reason.contains("failed");

        let target = {
            let state = self.state.lock().await;
            let session = match state.active.get(call_id) {
                Some(session) => session,
                None => return false,
            };
            if error {
                CallState::Failed
            } else {
                match session.state {
                    CallState::Connected | CallState::OnHold | CallState::Transferring => {
                        CallState::Completed
                    }
                    _ => CallState::Cancelled,
                }
            }
        };

        self.transition(call_id, target, Some(reason.to_string()), |_| {})
            .await
    }

    async fn transition(
        &self,
        call_id: &str,
        new_state: CallState,
        reason: Option<String>,
        mutate: impl FnOnce(&mut CallSession) + Send,
    ) -> bool {
        let (snapshot, old_state) = {
            let mut state = self.state.lock().await;
            let session = match state.active.get_mut(call_id) {
                Some(session) => session,
                None => {
                    tracing::debug!(call_id, "state update for unknown call ignored");
                    return false;
                }
            };

            let old_state = session.state;
            if !old_state.can_transition_to(new_state) {
                tracing::warn!(
                    call_id,
                    from = %old_state,
                    to = %new_state,
                    "rejected invalid state transition"
                );
                return false;
            }

            session.state = new_state;
            match new_state {
                CallState::Ringing => session.ring_start = Some(Instant::now()),
                CallState::Connected => {
                    if session.connect_time.is_none() {
                        session.connect_time = Some(Instant::now());
                    }
                }
                _ => {}
            }
            if new_state.is_terminal() {
                session.end_time = Some(Instant::now());
                if let Some(reason) = reason {
                    session.end_reason = Some(reason);
                }
            }
            mutate(session);

            let snapshot = session.clone();
            if new_state.is_terminal() {
                state.active.remove(call_id);
                let caller = snapshot.caller.number.clone();
                if let Some(count) = state.number_counts.get_mut(&caller) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        state.number_counts.remove(&caller);
                    }
                }
            }
            (snapshot, old_state)
        };

        self.notify_state_changed(&snapshot, old_state, new_state).await;

        if new_state.is_terminal() {
            self.events
                .emit(Event::for_call(
                    topics::CALL_ENDED,
                    snapshot.call_id.clone(),
                    json!({
                        "state": new_state.to_string(),
                        "reason": snapshot.end_reason,
                    }),
                ))
                .await;
            let observers: Vec<_> = self.observers.read().clone();
            for observer in observers {
                observer.on_call_terminated(&snapshot).await;
            }
        }

        true
    }

    async fn notify_state_changed(
        &self,
        session: &CallSession,
        old_state: CallState,
        new_state: CallState,
    ) {
        self.events
            .emit(Event::for_call(
                topics::STATE_CHANGED,
                session.call_id.clone(),
                json!({
                    "old_state": old_state.to_string(),
                    "new_state": new_state.to_string(),
                }),
            ))
            .await;

        let observers: Vec<_> = self.observers.read().clone();
        for observer in observers {
            observer.on_state_changed(session, old_state, new_state).await;
        }
    }

    /// Read-only snapshot of a session.
    pub async fn get_call_session(&self, call_id: &str) -> Option<CallSession> {
        self.state.lock().await.active.get(call_id).cloned()
    }

    /// Record the media binding once the RTP session exists.
    pub async fn set_media_binding(
        &self,
        call_id: &str,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> bool {
        let mut state = self.state.lock().await;
        match state.active.get_mut(call_id) {
            Some(session) => {
                session.rtp_local_port = Some(local_port);
                session.rtp_remote_host = Some(remote_host.to_string());
                session.rtp_remote_port = Some(remote_port);
                true
            }
            None => false,
        }
    }

    /// Record the AI session id after the bridge handshake.
    pub async fn set_ai_session(&self, call_id: &str, ai_session_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.active.get_mut(call_id) {
            Some(session) => {
                session.ai_session_id = Some(ai_session_id.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn active_call_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn calls_from_number(&self, number: &str) -> usize {
        self.state
            .lock()
            .await
            .number_counts
            .get(number)
            .copied()
            .unwrap_or(0)
    }

    pub async fn total_calls(&self) -> u64 {
        self.state.lock().await.total_calls
    }

    pub async fn list_active_calls(&self) -> Vec<String> {
        self.state.lock().await.active.keys().cloned().collect()
    }

    /// Promote the frontmost queued call to active, if capacity allows.
    pub async fn promote_next_queued(&self) -> Option<CallSession> {
        let session = {
            let state = self.state.lock().await;
            if state.active.len() >= self.config.max_concurrent_calls {
                return None;
            }
            self.queue.lock().get_next_call()?
        };

        let mut session = session;
        {
            let mut state = self.state.lock().await;
            session.state = CallState::Ringing;
            session.ring_start = Some(Instant::now());
            *state
                .number_counts
                .entry(session.caller.number.clone())
                .or_insert(0) += 1;
            state.total_calls += 1;
            state.active.insert(session.call_id.clone(), session.clone());
        }

        self.notify_state_changed(&session, CallState::Initializing, CallState::Ringing)
            .await;
        Some(session)
    }

    pub fn queued_call_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Evict queue entries past the admission timeout; returns the expired
    /// sessions for rejection reporting.
    pub async fn sweep_queue(&self, now: Instant) -> Vec<CallSession> {
        let expired = self.queue.lock().cleanup_expired(now);
        for session in &expired {
            self.events
                .emit(Event::for_call(
                    topics::CALL_ENDED,
                    session.call_id.clone(),
                    json!({"state": "cancelled", "reason": "queue_timeout"}),
                ))
                .await;
        }
        expired
    }

    /// Force-terminate sessions stuck in a non-terminal state for too long.
    pub async fn sweep_stale(&self, now: Instant) -> Vec<String> {
        let stale: Vec<String> = {
            let state = self.state.lock().await;
            state
                .active
                .values()
                .filter(|s| now.duration_since(s.created_at) > self.config.stale_call_max_age)
                .map(|s| s.call_id.clone())
                .collect()
        };

        for call_id in &stale {
            self.hangup_call(call_id, "stale_call_cleanup").await;
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> CallManager {
        let config = CallManagerConfig {
            max_concurrent_calls: 3,
            max_calls_per_number: 2,
            max_queue_size: 2,
            queued_call_timeout: Duration::from_secs(300),
            stale_call_max_age: Duration::from_secs(14400),
        };
        CallManager::new(config, Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn accepted_call_lands_in_ringing() {
        let mgr = manager();
        let decision = mgr
            .handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        assert_eq!(decision, RoutingDecision::Accept);

        let session = mgr.get_call_session("c1").await.unwrap();
        assert_eq!(session.state, CallState::Ringing);
        assert!(session.ring_start.is_some());
        assert_eq!(session.codec, "PCMU");
        assert_eq!(mgr.active_call_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_call_id_is_rejected() {
        let mgr = manager();
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        let decision = mgr
            .handle_incoming_call(IncomingCallData::new("c1", "+3", "+2"))
            .await;
        assert_eq!(
            decision,
            RoutingDecision::Reject {
                reason: "duplicate_call_id".to_string()
            }
        );
    }

    #[tokio::test]
    async fn concurrent_cap_is_enforced() {
        let mgr = manager();
        for i in 0..3 {
            let decision = mgr
                .handle_incoming_call(IncomingCallData::new(
                    &format!("c{i}"),
                    &format!("+{i}"),
                    "+2",
                ))
                .await;
            assert_eq!(decision, RoutingDecision::Accept);
        }
        let decision = mgr
            .handle_incoming_call(IncomingCallData::new("c9", "+9", "+2"))
            .await;
        assert_eq!(
            decision,
            RoutingDecision::Reject {
                reason: "max_concurrent_calls_reached".to_string()
            }
        );
    }

    #[tokio::test]
    async fn per_number_cap_is_enforced_and_released() {
        let mgr = manager();
        for i in 0..2 {
            mgr.handle_incoming_call(IncomingCallData::new(&format!("c{i}"), "+1", "+2"))
                .await;
        }
        let decision = mgr
            .handle_incoming_call(IncomingCallData::new("c2", "+1", "+2"))
            .await;
        assert_eq!(
            decision,
            RoutingDecision::Reject {
                reason: "per_number_limit_reached".to_string()
            }
        );

        // Ending one call frees a slot for the same number.
        assert!(mgr.hangup_call("c0", "normal").await);
        assert_eq!(mgr.calls_from_number("+1").await, 1);
        let decision = mgr
            .handle_incoming_call(IncomingCallData::new("c2", "+1", "+2"))
            .await;
        assert_eq!(decision, RoutingDecision::Accept);
    }

    #[tokio::test]
    async fn state_machine_rejects_off_table_transitions() {
        let mgr = manager();
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;

        // Ringing cannot jump straight to OnHold.
        assert!(!mgr.update_call_state("c1", CallState::OnHold).await);
        let session = mgr.get_call_session("c1").await.unwrap();
        assert_eq!(session.state, CallState::Ringing);

        assert!(mgr.update_call_state("c1", CallState::Connecting).await);
        assert!(mgr.update_call_state("c1", CallState::Connected).await);
        let session = mgr.get_call_session("c1").await.unwrap();
        assert!(session.connect_time.is_some());
    }

    #[tokio::test]
    async fn unknown_call_operations_are_noops() {
        let mgr = manager();
        assert!(!mgr.update_call_state("ghost", CallState::Connected).await);
        assert!(!mgr.hold_call("ghost").await);
        assert!(!mgr.hangup_call("ghost", "normal").await);
        assert!(mgr.get_call_session("ghost").await.is_none());
    }

    #[tokio::test]
    async fn hold_and_resume_cycle() {
        let mgr = manager();
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        mgr.update_call_state("c1", CallState::Connecting).await;
        mgr.update_call_state("c1", CallState::Connected).await;

        assert!(mgr.hold_call("c1").await);
        let session = mgr.get_call_session("c1").await.unwrap();
        assert_eq!(session.state, CallState::OnHold);
        assert!(session.on_hold);

        assert!(mgr.resume_call("c1").await);
        let session = mgr.get_call_session("c1").await.unwrap();
        assert_eq!(session.state, CallState::Connected);
        assert!(!session.on_hold);

        // Resume only works from hold.
        assert!(!mgr.resume_call("c1").await);
    }

    #[tokio::test]
    async fn transfer_requires_connected() {
        let mgr = manager();
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        assert!(!mgr.transfer_call("c1", "+1555").await);

        mgr.update_call_state("c1", CallState::Connecting).await;
        mgr.update_call_state("c1", CallState::Connected).await;
        assert!(mgr.transfer_call("c1", "+1555").await);

        let session = mgr.get_call_session("c1").await.unwrap();
        assert_eq!(session.state, CallState::Transferring);
        assert_eq!(session.transfer_target.as_deref(), Some("+1555"));
    }

    #[tokio::test]
    async fn hangup_picks_legal_terminal_state() {
        let mgr = manager();

        // Never connected: cancelled.
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        assert!(mgr.hangup_call("c1", "caller_abandoned").await);
        assert!(mgr.get_call_session("c1").await.is_none());

        // Connected: completed.
        mgr.handle_incoming_call(IncomingCallData::new("c2", "+1", "+2"))
            .await;
        mgr.update_call_state("c2", CallState::Connecting).await;
        mgr.update_call_state("c2", CallState::Connected).await;
        assert!(mgr.hangup_call("c2", "normal").await);

        // Error reason: failed.
        mgr.handle_incoming_call(IncomingCallData::new("c3", "+1", "+2"))
            .await;
        assert!(mgr.hangup_call("c3", "ai_unreachable error").await);
        assert_eq!(mgr.active_call_count().await, 0);
    }

    #[tokio::test]
    async fn recording_toggles() {
        let mgr = manager();
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        assert!(mgr.start_recording("c1").await);
        assert!(mgr.get_call_session("c1").await.unwrap().recording);
        assert!(mgr.stop_recording("c1").await);
        assert!(!mgr.get_call_session("c1").await.unwrap().recording);
    }

    #[tokio::test]
    async fn stale_sessions_are_swept() {
        let mgr = manager();
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;

        let far_future = Instant::now() + Duration::from_secs(14500);
        let swept = mgr.sweep_stale(far_future).await;
        assert_eq!(swept, vec!["c1".to_string()]);
        assert_eq!(mgr.active_call_count().await, 0);
    }

    #[tokio::test]
    async fn queue_rule_parks_calls_until_promoted() {
        use crate::router::{RoutingRule, RuleAction};

        let mgr = manager();
        mgr.router.write().add_rule(RoutingRule::new(
            "park-everything",
            10,
            RuleAction::Queue {
                name: "overflow".to_string(),
                priority: CallPriority::High,
            },
        ));

        let decision = mgr
            .handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        assert!(matches!(decision, RoutingDecision::Queue { .. }));
        // Queued calls are not active.
        assert_eq!(mgr.active_call_count().await, 0);
        assert_eq!(mgr.queued_call_count(), 1);

        let promoted = mgr.promote_next_queued().await.unwrap();
        assert_eq!(promoted.call_id, "c1");
        assert_eq!(promoted.state, CallState::Ringing);
        assert_eq!(mgr.active_call_count().await, 1);
        assert_eq!(mgr.queued_call_count(), 0);
    }

    #[tokio::test]
    async fn queued_calls_expire_via_sweeper() {
        use crate::router::{RoutingRule, RuleAction};

        let mgr = manager();
        mgr.router.write().add_rule(RoutingRule::new(
            "park-everything",
            10,
            RuleAction::Queue {
                name: "overflow".to_string(),
                priority: CallPriority::Normal,
            },
        ));
        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;

        let expired = mgr
            .sweep_queue(Instant::now() + Duration::from_secs(301))
            .await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].call_id, "c1");
        assert_eq!(mgr.queued_call_count(), 0);
    }

    #[tokio::test]
    async fn observer_sees_termination_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counter {
            terminated: AtomicUsize,
        }

        #[async_trait]
        impl CallObserver for Counter {
            async fn on_call_terminated(&self, _session: &CallSession) {
                self.terminated.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mgr = manager();
        let observer = Arc::new(Counter {
            terminated: AtomicUsize::new(0),
        });
        mgr.add_observer(observer.clone());

        mgr.handle_incoming_call(IncomingCallData::new("c1", "+1", "+2"))
            .await;
        mgr.hangup_call("c1", "normal").await;
        // Second hangup is a no-op on an unknown call.
        mgr.hangup_call("c1", "normal").await;

        assert_eq!(observer.terminated.load(Ordering::SeqCst), 1);
    }
}
