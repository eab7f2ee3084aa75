//! DTMF pattern matching and action dispatch.
//!
//! Each call accumulates a digit sequence. Every event appends a digit and
//! tests the configured patterns, longest pattern first; the first match
//! fires its action and clears the sequence. Digits that match nothing are
//! forwarded to the AI individually as `dtmf_digit` frames. A sweeper
//! clears sequences idle past the timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::actions::CallActions;
use crate::error::{DtmfError, Result};
use crate::event::DtmfEvent;

/// What a matched pattern does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtmfAction {
    ForwardToAi,
    TransferCall,
    PlayAudio,
    HangupCall,
    ToggleRecording,
    EnterIvr,
    CustomHandler,
}

impl DtmfAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DtmfAction::ForwardToAi => "forward_to_ai",
            DtmfAction::TransferCall => "transfer_call",
            DtmfAction::PlayAudio => "play_audio",
            DtmfAction::HangupCall => "hangup_call",
            DtmfAction::ToggleRecording => "toggle_recording",
            DtmfAction::EnterIvr => "enter_ivr",
            DtmfAction::CustomHandler => "custom_handler",
        }
    }
}

/// A configured pattern and its action parameters.
#[derive(Debug, Clone)]
pub struct DtmfPattern {
    pub pattern: String,
    pub action: DtmfAction,
    pub timeout: Duration,
    pub description: String,
    pub transfer_target: Option<String>,
    pub audio_file: Option<String>,
    pub ivr_menu_id: Option<String>,
    pub custom_handler: Option<String>,
    pub ai_context: Value,
    regex: Regex,
}

impl DtmfPattern {
    pub fn new(pattern: &str, action: DtmfAction) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| DtmfError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            action,
            timeout: Duration::from_secs(5),
            description: String::new(),
            transfer_target: None,
            audio_file: None,
            ivr_menu_id: None,
            custom_handler: None,
            ai_context: Value::Null,
            regex,
        })
    }

    pub fn with_transfer_target(mut self, target: &str) -> Self {
        self.transfer_target = Some(target.to_string());
        self
    }

    pub fn with_audio_file(mut self, file: &str) -> Self {
        self.audio_file = Some(file.to_string());
        self
    }

    pub fn with_ivr_menu(mut self, menu_id: &str) -> Self {
        self.ivr_menu_id = Some(menu_id.to_string());
        self
    }

    pub fn with_custom_handler(mut self, name: &str) -> Self {
        self.custom_handler = Some(name.to_string());
        self
    }

    pub fn with_ai_context(mut self, context: Value) -> Self {
        self.ai_context = context;
        self
    }

    /// Anchored match against the whole accumulated sequence.
    fn matches(&self, digits: &str) -> bool {
        self.regex
            .find(digits)
            .map(|m| m.start() == 0)
            .unwrap_or(false)
    }
}

/// Result of a matched pattern, returned to the caller for logging.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: String,
    pub action: DtmfAction,
    pub sequence: String,
}

/// Custom handler resolved by name at configuration time.
#[async_trait]
pub trait CustomDtmfHandler: Send + Sync {
    async fn handle(&self, call_id: &str, sequence: &str, pattern: &DtmfPattern);
}

struct ActiveSequence {
    digits: String,
    started_at: Instant,
    last_digit_at: Instant,
    event_count: usize,
}

/// The processor. One per bridge; state is per call.
pub struct DtmfProcessor {
    patterns: Vec<DtmfPattern>,
    sequences: HashMap<String, ActiveSequence>,
    custom_handlers: HashMap<String, Arc<dyn CustomDtmfHandler>>,
    actions: Arc<dyn CallActions>,
    sequence_timeout: Duration,
    max_sequence_length: usize,
    matched_patterns: u64,
    forwarded_digits: u64,
}

impl DtmfProcessor {
    pub fn new(actions: Arc<dyn CallActions>, sequence_timeout: Duration) -> Self {
        Self {
            patterns: Vec::new(),
            sequences: HashMap::new(),
            custom_handlers: HashMap::new(),
            actions,
            sequence_timeout,
            max_sequence_length: 20,
            matched_patterns: 0,
            forwarded_digits: 0,
        }
    }

    pub fn register_custom_handler(&mut self, name: &str, handler: Arc<dyn CustomDtmfHandler>) {
        self.custom_handlers.insert(name.to_string(), handler);
    }

    /// Add a pattern. A `CustomHandler` action must name a handler that is
    /// already registered; unknown names fail here, not at dispatch.
    pub fn add_pattern(&mut self, pattern: DtmfPattern) -> Result<()> {
        if pattern.action == DtmfAction::CustomHandler {
            let name = pattern
                .custom_handler
                .as_deref()
                .ok_or_else(|| DtmfError::UnknownHandler("<unset>".to_string()))?;
            if !self.custom_handlers.contains_key(name) {
                return Err(DtmfError::UnknownHandler(name.to_string()));
            }
        }

        self.patterns.push(pattern);
        // Longer patterns first so the most specific match wins.
        self.patterns
            .sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
        Ok(())
    }

    pub fn remove_pattern(&mut self, pattern: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.pattern != pattern);
        self.patterns.len() != before
    }

    /// Process one detected digit. Returns the match outcome when a pattern
    /// fired.
    pub async fn process_event(&mut self, event: &DtmfEvent) -> Option<PatternMatch> {
        let call_id = event.call_id.clone();
        let now = event.timestamp;

        let sequence = self
            .sequences
            .entry(call_id.clone())
            .or_insert_with(|| ActiveSequence {
                digits: String::new(),
                started_at: now,
                last_digit_at: now,
                event_count: 0,
            });
        sequence.digits.push(event.digit);
        sequence.last_digit_at = now;
        sequence.event_count += 1;

        let digits = sequence.digits.clone();
        let duration = now.duration_since(sequence.started_at);
        let event_count = sequence.event_count;

        tracing::debug!(call_id = %call_id, sequence = %digits, "DTMF sequence updated");

        let matched = self
            .patterns
            .iter()
            .find(|p| p.matches(&digits))
            .cloned();

        if let Some(pattern) = matched {
            tracing::info!(call_id = %call_id, pattern = %pattern.pattern, "DTMF pattern matched");
            self.sequences.remove(&call_id);
            self.matched_patterns += 1;
            self.execute_action(&call_id, &digits, duration, event_count, &pattern)
                .await;
            return Some(PatternMatch {
                pattern: pattern.pattern.clone(),
                action: pattern.action.clone(),
                sequence: digits,
            });
        }

        if digits.len() >= self.max_sequence_length {
            tracing::warn!(call_id = %call_id, "DTMF sequence too long, clearing");
            self.sequences.remove(&call_id);
        }

        // No pattern: the digit still reaches the AI on its own.
        self.forward_digit(event).await;
        None
    }

    async fn execute_action(
        &mut self,
        call_id: &str,
        digits: &str,
        duration: Duration,
        event_count: usize,
        pattern: &DtmfPattern,
    ) {
        match &pattern.action {
            DtmfAction::ForwardToAi => {
                let frame = json!({
                    "type": "dtmf_sequence",
                    "data": {
                        "call_id": call_id,
                        "sequence": digits,
                        "pattern_matched": pattern.pattern,
                        "duration_seconds": duration.as_secs_f64(),
                        "event_count": event_count,
                        "context": pattern.ai_context,
                    }
                });
                self.actions.forward_to_ai(call_id, frame).await;
            }
            DtmfAction::TransferCall => {
                if let Some(target) = &pattern.transfer_target {
                    self.actions.transfer_call(call_id, target).await;
                } else {
                    tracing::warn!(pattern = %pattern.pattern, "transfer pattern has no target");
                }
            }
            DtmfAction::PlayAudio => {
                if let Some(file) = &pattern.audio_file {
                    self.actions.play_audio(call_id, file).await;
                }
            }
            DtmfAction::HangupCall => {
                self.actions.hangup_call(call_id, "dtmf_hangup").await;
            }
            DtmfAction::ToggleRecording => {
                self.actions.toggle_recording(call_id).await;
            }
            DtmfAction::EnterIvr => {
                if let Some(menu_id) = &pattern.ivr_menu_id {
                    self.actions.enter_ivr(call_id, menu_id).await;
                }
            }
            DtmfAction::CustomHandler => {
                // Validated at add_pattern time.
                if let Some(handler) = pattern
                    .custom_handler
                    .as_deref()
                    .and_then(|name| self.custom_handlers.get(name))
                {
                    handler.handle(call_id, digits, pattern).await;
                }
            }
        }
    }

    async fn forward_digit(&mut self, event: &DtmfEvent) {
        let frame = json!({
            "type": "dtmf_digit",
            "data": {
                "call_id": event.call_id,
                "digit": event.digit.to_string(),
                "method": event.method.as_str(),
                "duration_ms": event.duration_ms,
                "confidence": event.confidence,
            }
        });
        if self.actions.forward_to_ai(&event.call_id, frame).await {
            self.forwarded_digits += 1;
        }
    }

    /// Clear sequences idle past the timeout. Called by the sweeper.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let timeout = self.sequence_timeout;
        let before = self.sequences.len();
        self.sequences
            .retain(|_, seq| now.duration_since(seq.last_digit_at) <= timeout);
        before - self.sequences.len()
    }

    /// Drop per-call state on teardown.
    pub fn clear_call(&mut self, call_id: &str) {
        self.sequences.remove(call_id);
    }

    /// Current sequence for a call, for introspection.
    pub fn active_sequence(&self, call_id: &str) -> Option<&str> {
        self.sequences.get(call_id).map(|s| s.digits.as_str())
    }

    pub fn active_sequence_count(&self) -> usize {
        self.sequences.len()
    }

    pub fn matched_pattern_count(&self) -> u64 {
        self.matched_patterns
    }
}
