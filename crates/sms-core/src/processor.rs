//! Inbound SMS processing: conversations, spam scoring, rules, actions.
//!
//! Rules run in descending priority until one matches; with no match the
//! message goes to the AI. Conversation tracking keys on the sorted number
//! pair and ages out on a TTL.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Local, NaiveTime, Timelike};
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::{Result, SmsError};
use crate::message::SmsMessage;

/// What a matched rule does with the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsProcessingAction {
    ForwardToAi,
    AutoReply,
    ForwardToNumber,
    BlockSender,
    TriggerCall,
    StoreOnly,
    CustomHandler,
}

impl SmsProcessingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsProcessingAction::ForwardToAi => "forward_to_ai",
            SmsProcessingAction::AutoReply => "auto_reply",
            SmsProcessingAction::ForwardToNumber => "forward_to_number",
            SmsProcessingAction::BlockSender => "block_sender",
            SmsProcessingAction::TriggerCall => "trigger_call",
            SmsProcessingAction::StoreOnly => "store_only",
            SmsProcessingAction::CustomHandler => "custom_handler",
        }
    }
}

/// Side effects the processor can request.
#[async_trait]
pub trait SmsActions: Send + Sync {
    /// Hand the message to the AI platform with optional rule context.
    async fn forward_to_ai(&self, message: &SmsMessage, context: &Value) -> bool;

    /// Send an auto-reply body back to the sender.
    async fn send_reply(&self, to_number: &str, from_number: &str, body: &str) -> bool;

    /// Relay the message to another number.
    async fn forward_to_number(&self, message: &SmsMessage, target: &str) -> bool;

    /// Place an outbound call between the two parties.
    async fn trigger_call(&self, from_number: &str, to_number: &str) -> bool;

    /// Persist the message without further handling.
    async fn store_message(&self, message: &SmsMessage);
}

/// Custom rule handler resolved by name at configuration time.
#[async_trait]
pub trait CustomSmsHandler: Send + Sync {
    async fn handle(&self, message: &SmsMessage, rule: &SmsRule);
}

/// One processing rule.
#[derive(Debug, Clone)]
pub struct SmsRule {
    pub rule_id: String,
    pub priority: u32,
    /// Regex tested against the body (or the sender when `match_sender`).
    pub pattern: String,
    pub case_sensitive: bool,
    pub match_sender: bool,
    pub action: SmsProcessingAction,
    /// Action parameters: reply template name, forward target, handler
    /// name, AI context.
    pub parameters: Value,
    pub custom_handler: Option<String>,
    /// Local-time window when the rule applies.
    pub time_window: Option<(NaiveTime, NaiveTime)>,
    /// Senders this rule applies to exclusively (empty = all).
    pub sender_whitelist: HashSet<String>,
    /// Senders this rule never applies to.
    pub sender_blacklist: HashSet<String>,
    pub enabled: bool,
    regex: Regex,
}

impl SmsRule {
    pub fn new(rule_id: &str, priority: u32, pattern: &str, action: SmsProcessingAction) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| SmsError::InvalidRule {
                rule: rule_id.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            rule_id: rule_id.to_string(),
            priority,
            pattern: pattern.to_string(),
            case_sensitive: false,
            match_sender: false,
            action,
            parameters: Value::Null,
            custom_handler: None,
            time_window: None,
            sender_whitelist: HashSet::new(),
            sender_blacklist: HashSet::new(),
            enabled: true,
            regex,
        })
    }

    pub fn case_sensitive(mut self) -> Result<Self> {
        self.case_sensitive = true;
        self.regex = RegexBuilder::new(&self.pattern)
            .case_insensitive(false)
            .build()
            .map_err(|e| SmsError::InvalidRule {
                rule: self.rule_id.clone(),
                message: e.to_string(),
            })?;
        Ok(self)
    }

    pub fn matching_sender(mut self) -> Self {
        self.match_sender = true;
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_custom_handler(mut self, name: &str) -> Self {
        self.custom_handler = Some(name.to_string());
        self
    }

    fn matches(&self, message: &SmsMessage, now_local: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        if self.sender_blacklist.contains(&message.from_number) {
            return false;
        }
        if !self.sender_whitelist.is_empty()
            && !self.sender_whitelist.contains(&message.from_number)
        {
            return false;
        }
        if let Some((start, end)) = self.time_window {
            let inside = if start <= end {
                now_local >= start && now_local <= end
            } else {
                now_local >= start || now_local <= end
            };
            if !inside {
                return false;
            }
        }

        let haystack = if self.match_sender {
            &message.from_number
        } else {
            &message.body
        };
        self.regex.is_match(haystack)
    }
}

struct Conversation {
    message_count: u64,
    last_activity: Instant,
}

/// Outcome reported to the caller for logging and the admin surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutcome {
    pub action: String,
    pub rule_id: Option<String>,
    pub spam_score: Option<f64>,
}

/// Inbound message classifier and dispatcher.
pub struct SmsProcessor {
    rules: Vec<SmsRule>,
    conversations: HashMap<(String, String), Conversation>,
    conversation_ttl: Duration,
    spam_patterns: Vec<Regex>,
    spam_threshold: f64,
    spam_filter_enabled: bool,
    templates: HashMap<String, String>,
    custom_handlers: HashMap<String, Arc<dyn CustomSmsHandler>>,
    blocked_senders: HashSet<String>,
    actions: Arc<dyn SmsActions>,
    processed: u64,
    spam_blocked: u64,
}

impl SmsProcessor {
    pub fn new(actions: Arc<dyn SmsActions>) -> Self {
        let spam_patterns = [
            r"(?i)free\s+(money|cash|prize|gift)",
            r"(?i)(click|tap)\s+(here|now|link)",
            r"(?i)congratulations.*(won|winner)",
            r"(?i)urgent.*(respond|reply|act)\s+now",
            r"(?i)(viagra|casino|lottery)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        let mut templates = HashMap::new();
        templates.insert(
            "default".to_string(),
            "Thanks for your message. We will get back to you shortly.".to_string(),
        );

        Self {
            rules: Vec::new(),
            conversations: HashMap::new(),
            conversation_ttl: Duration::from_secs(24 * 3600),
            spam_patterns,
            spam_threshold: 0.8,
            spam_filter_enabled: true,
            templates,
            custom_handlers: HashMap::new(),
            blocked_senders: HashSet::new(),
            actions,
            processed: 0,
            spam_blocked: 0,
        }
    }

    pub fn register_custom_handler(&mut self, name: &str, handler: Arc<dyn CustomSmsHandler>) {
        self.custom_handlers.insert(name.to_string(), handler);
    }

    pub fn add_template(&mut self, name: &str, template: &str) {
        self.templates.insert(name.to_string(), template.to_string());
    }

    pub fn set_spam_filter(&mut self, enabled: bool, threshold: f64) {
        self.spam_filter_enabled = enabled;
        self.spam_threshold = threshold;
    }

    /// Add a rule. Custom-handler rules must name a registered handler.
    pub fn add_rule(&mut self, rule: SmsRule) -> Result<()> {
        if rule.action == SmsProcessingAction::CustomHandler {
            let name = rule
                .custom_handler
                .as_deref()
                .ok_or_else(|| SmsError::InvalidRule {
                    rule: rule.rule_id.clone(),
                    message: "custom handler not named".to_string(),
                })?;
            if !self.custom_handlers.contains_key(name) {
                return Err(SmsError::InvalidRule {
                    rule: rule.rule_id.clone(),
                    message: format!("unknown custom handler '{name}'"),
                });
            }
        }

        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.rule_id != rule_id);
        self.rules.len() != before
    }

    /// Classify and dispatch one inbound message.
    pub async fn process_inbound(&mut self, message: &SmsMessage, now: Instant) -> ProcessingOutcome {
        self.processed += 1;

        if self.blocked_senders.contains(&message.from_number) {
            return ProcessingOutcome {
                action: "sender_blocked".to_string(),
                rule_id: None,
                spam_score: None,
            };
        }

        self.track_conversation(message, now);

        if self.spam_filter_enabled {
            let score = self.spam_score(message);
            if score >= self.spam_threshold {
                self.spam_blocked += 1;
                tracing::warn!(
                    message_id = %message.message_id,
                    score,
                    "blocking message as spam"
                );
                return ProcessingOutcome {
                    action: "spam_blocked".to_string(),
                    rule_id: None,
                    spam_score: Some(score),
                };
            }
        }

        let local = Local::now();
        let now_local = NaiveTime::from_hms_opt(local.hour(), local.minute(), local.second())
            .unwrap_or(NaiveTime::MIN);
        let matched = self
            .rules
            .iter()
            .find(|r| r.matches(message, now_local))
            .cloned();

        if let Some(rule) = matched {
            let action = rule.action.as_str().to_string();
            let rule_id = rule.rule_id.clone();
            self.execute_rule(&rule, message).await;
            return ProcessingOutcome {
                action,
                rule_id: Some(rule_id),
                spam_score: None,
            };
        }

        // Default path: the AI gets the message.
        self.actions.forward_to_ai(message, &Value::Null).await;
        ProcessingOutcome {
            action: "forward_to_ai".to_string(),
            rule_id: None,
            spam_score: None,
        }
    }

    async fn execute_rule(&mut self, rule: &SmsRule, message: &SmsMessage) {
        match rule.action {
            SmsProcessingAction::ForwardToAi => {
                self.actions.forward_to_ai(message, &rule.parameters).await;
            }
            SmsProcessingAction::AutoReply => {
                let template_name = rule
                    .parameters
                    .get("template")
                    .and_then(Value::as_str)
                    .unwrap_or("default");
                let template = self
                    .templates
                    .get(template_name)
                    .cloned()
                    .unwrap_or_else(|| self.templates["default"].clone());
                let body = render_template(&template, message);
                self.actions
                    .send_reply(&message.from_number, &message.to_number, &body)
                    .await;
            }
            SmsProcessingAction::ForwardToNumber => {
                if let Some(target) = rule.parameters.get("target").and_then(Value::as_str) {
                    self.actions.forward_to_number(message, target).await;
                } else {
                    tracing::warn!(rule = %rule.rule_id, "forward rule has no target");
                }
            }
            SmsProcessingAction::BlockSender => {
                self.blocked_senders.insert(message.from_number.clone());
                tracing::info!(sender = %message.from_number, "sender blocked by rule");
            }
            SmsProcessingAction::TriggerCall => {
                self.actions
                    .trigger_call(&message.to_number, &message.from_number)
                    .await;
            }
            SmsProcessingAction::StoreOnly => {
                self.actions.store_message(message).await;
            }
            SmsProcessingAction::CustomHandler => {
                // Validated at add_rule time.
                if let Some(handler) = rule
                    .custom_handler
                    .as_deref()
                    .and_then(|name| self.custom_handlers.get(name))
                {
                    handler.handle(message, rule).await;
                }
            }
        }
    }

    fn track_conversation(&mut self, message: &SmsMessage, now: Instant) {
        let key = conversation_key(&message.from_number, &message.to_number);
        let conversation = self.conversations.entry(key).or_insert(Conversation {
            message_count: 0,
            last_activity: now,
        });
        conversation.message_count += 1;
        conversation.last_activity = now;
    }

    /// Weighted spam score in `[0, 1]`.
    fn spam_score(&self, message: &SmsMessage) -> f64 {
        let body = &message.body;
        let mut score = 0.0;

        if !self.spam_patterns.is_empty() {
            let hits = self
                .spam_patterns
                .iter()
                .filter(|p| p.is_match(body))
                .count();
            score += (hits as f64 / self.spam_patterns.len() as f64) * 0.6;
        }

        let letters: Vec<char> = body.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() > 10 {
            let upper = letters.iter().filter(|c| c.is_uppercase()).count();
            if upper as f64 / letters.len() as f64 > 0.7 {
                score += 0.1;
            }
        }

        let punct = body.chars().filter(|c| matches!(c, '!' | '?')).count();
        if punct > 3 {
            score += 0.1;
        }

        if body.contains("http://") || body.contains("https://") || body.contains("www.") {
            score += 0.1;
        }

        let phone_like = Regex::new(r"\+?\d{7,}").expect("static regex");
        if phone_like.find_iter(body).count() >= 2 {
            score += 0.1;
        }

        score.min(1.0)
    }

    /// Age out idle conversations; returns how many were dropped.
    pub fn sweep_conversations(&mut self, now: Instant) -> usize {
        let ttl = self.conversation_ttl;
        let before = self.conversations.len();
        self.conversations
            .retain(|_, c| now.duration_since(c.last_activity) <= ttl);
        before - self.conversations.len()
    }

    pub fn is_blocked(&self, number: &str) -> bool {
        self.blocked_senders.contains(number)
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub fn processed_count(&self) -> u64 {
        self.processed
    }

    pub fn spam_blocked_count(&self) -> u64 {
        self.spam_blocked
    }
}

fn conversation_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn render_template(template: &str, message: &SmsMessage) -> String {
    template
        .replace("{from_number}", &message.from_number)
        .replace("{to_number}", &message.to_number)
        .replace("{body}", &message.body)
}
