//! Core call types and the authoritative state machine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call lifecycle states.
///
/// ```text
/// INITIALIZING -> RINGING | CONNECTING | FAILED | CANCELLED
/// RINGING      -> CONNECTING | CANCELLED | FAILED
/// CONNECTING   -> CONNECTED | FAILED | CANCELLED
/// CONNECTED    -> ON_HOLD | TRANSFERRING | COMPLETED | FAILED
/// ON_HOLD      -> CONNECTED | COMPLETED | FAILED
/// TRANSFERRING -> CONNECTED | COMPLETED | FAILED
/// COMPLETED, FAILED, CANCELLED are terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initializing,
    Ringing,
    Connecting,
    Connected,
    OnHold,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Cancelled
        )
    }

    /// Whether the transition `self -> next` is in the table.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match self {
            Initializing => matches!(next, Ringing | Connecting | Failed | Cancelled),
            Ringing => matches!(next, Connecting | Cancelled | Failed),
            Connecting => matches!(next, Connected | Failed | Cancelled),
            Connected => matches!(next, OnHold | Transferring | Completed | Failed),
            OnHold => matches!(next, Connected | Completed | Failed),
            Transferring => matches!(next, Connected | Completed | Failed),
            Completed | Failed | Cancelled => false,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallState::Initializing => "initializing",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::OnHold => "on_hold",
            CallState::Transferring => "transferring",
            CallState::Completed => "completed",
            CallState::Failed => "failed",
            CallState::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Priority used for queue ordering; higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// One side of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Party {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: None,
        }
    }
}

/// The central per-call record, exclusively owned by the call manager.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Externally supplied unique id.
    pub call_id: String,
    /// Internal session id.
    pub session_id: String,
    pub caller: Party,
    pub callee: Party,
    pub direction: CallDirection,
    pub priority: CallPriority,
    pub state: CallState,
    pub created_at: Instant,
    pub ring_start: Option<Instant>,
    pub connect_time: Option<Instant>,
    pub end_time: Option<Instant>,
    /// Negotiated codec name, PCMU unless signaling said otherwise.
    pub codec: String,
    pub rtp_local_port: Option<u16>,
    pub rtp_remote_host: Option<String>,
    pub rtp_remote_port: Option<u16>,
    pub ai_session_id: Option<String>,
    pub on_hold: bool,
    pub recording: bool,
    pub transfer_target: Option<String>,
    pub sip_headers: HashMap<String, String>,
    pub end_reason: Option<String>,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        caller: Party,
        callee: Party,
        direction: CallDirection,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            session_id: format!("sess_{}", Uuid::new_v4()),
            caller,
            callee,
            direction,
            priority: CallPriority::Normal,
            state: CallState::Initializing,
            created_at: Instant::now(),
            ring_start: None,
            connect_time: None,
            end_time: None,
            codec: "PCMU".to_string(),
            rtp_local_port: None,
            rtp_remote_host: None,
            rtp_remote_port: None,
            ai_session_id: None,
            on_hold: false,
            recording: false,
            transfer_target: None,
            sip_headers: HashMap::new(),
            end_reason: None,
        }
    }

    /// Connected time so far, or final duration once ended.
    pub fn duration(&self) -> Option<Duration> {
        let connected = self.connect_time?;
        Some(match self.end_time {
            Some(end) => end.duration_since(connected),
            None => connected.elapsed(),
        })
    }

    /// Time spent ringing before connect (or until now).
    pub fn ring_duration(&self) -> Option<Duration> {
        let ring = self.ring_start?;
        Some(match self.connect_time {
            Some(connected) => connected.duration_since(ring),
            None => ring.elapsed(),
        })
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [CallState::Completed, CallState::Failed, CallState::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                CallState::Initializing,
                CallState::Ringing,
                CallState::Connecting,
                CallState::Connected,
                CallState::OnHold,
                CallState::Transferring,
                CallState::Completed,
                CallState::Failed,
                CallState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use CallState::*;
        assert!(Initializing.can_transition_to(Ringing));
        assert!(Ringing.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(OnHold));
        assert!(OnHold.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Transferring));
        assert!(Transferring.can_transition_to(Completed));

        // A few transitions that must be rejected.
        assert!(!Initializing.can_transition_to(Connected));
        assert!(!Ringing.can_transition_to(OnHold));
        assert!(!OnHold.can_transition_to(Transferring));
        assert!(!Connected.can_transition_to(Ringing));
    }

    #[test]
    fn priorities_order_correctly() {
        assert!(CallPriority::Urgent > CallPriority::High);
        assert!(CallPriority::High > CallPriority::Normal);
        assert!(CallPriority::Normal > CallPriority::Low);
    }

    #[test]
    fn durations_require_their_timestamps() {
        let session = CallSession::new(
            "c1",
            Party::new("+1"),
            Party::new("+2"),
            CallDirection::Inbound,
        );
        assert!(session.duration().is_none());
        assert!(session.ring_duration().is_none());

        let mut session = session;
        let t0 = Instant::now();
        session.ring_start = Some(t0);
        session.connect_time = Some(t0 + Duration::from_secs(5));
        session.end_time = Some(t0 + Duration::from_secs(35));
        assert_eq!(session.ring_duration().unwrap(), Duration::from_secs(5));
        assert_eq!(session.duration().unwrap(), Duration::from_secs(30));
    }
}
