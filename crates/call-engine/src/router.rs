//! Call routing: blacklist/whitelist screening and ordered rules.
//!
//! Rules are evaluated by descending priority; the first rule whose
//! conditions all hold decides the call. With no match the call is
//! accepted.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Local, NaiveTime, Timelike, Weekday};
use regex::Regex;
use serde::Serialize;

use crate::error::{CallEngineError, Result};
use crate::types::{CallPriority, CallSession};

/// What the router decided for a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoutingDecision {
    Accept,
    Reject {
        reason: String,
    },
    Forward {
        target: String,
        timeout_s: u64,
    },
    Queue {
        name: String,
        priority: CallPriority,
    },
}

/// Action configured on a rule; mirrors [`RoutingDecision`].
#[derive(Debug, Clone)]
pub enum RuleAction {
    Accept,
    Reject { reason: String },
    Forward { target: String, timeout_s: u64 },
    Queue { name: String, priority: CallPriority },
}

impl RuleAction {
    fn to_decision(&self) -> RoutingDecision {
        match self {
            RuleAction::Accept => RoutingDecision::Accept,
            RuleAction::Reject { reason } => RoutingDecision::Reject {
                reason: reason.clone(),
            },
            RuleAction::Forward { target, timeout_s } => RoutingDecision::Forward {
                target: target.clone(),
                timeout_s: *timeout_s,
            },
            RuleAction::Queue { name, priority } => RoutingDecision::Queue {
                name: name.clone(),
                priority: *priority,
            },
        }
    }
}

/// Optional match conditions; a rule matches when every present condition
/// holds.
#[derive(Debug, Clone, Default)]
pub struct RouteConditions {
    pub caller_pattern: Option<Regex>,
    pub callee_pattern: Option<Regex>,
    /// Local-time window; wraps midnight when start > end.
    pub time_window: Option<(NaiveTime, NaiveTime)>,
    pub days: Option<HashSet<Weekday>>,
}

impl RouteConditions {
    fn matches(&self, session: &CallSession, now: DateTime<Local>) -> bool {
        if let Some(pattern) = &self.caller_pattern {
            if !pattern.is_match(&session.caller.number) {
                return false;
            }
        }
        if let Some(pattern) = &self.callee_pattern {
            if !pattern.is_match(&session.callee.number) {
                return false;
            }
        }
        if let Some((start, end)) = self.time_window {
            let time = NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second())
                .unwrap_or(start);
            let inside = if start <= end {
                time >= start && time <= end
            } else {
                // Overnight window, e.g. 22:00-06:00.
                time >= start || time <= end
            };
            if !inside {
                return false;
            }
        }
        if let Some(days) = &self.days {
            if !days.contains(&now.weekday()) {
                return false;
            }
        }
        true
    }
}

/// One routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub name: String,
    pub priority: u32,
    pub conditions: RouteConditions,
    pub action: RuleAction,
}

impl RoutingRule {
    pub fn new(name: impl Into<String>, priority: u32, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            priority,
            conditions: RouteConditions::default(),
            action,
        }
    }

    pub fn with_caller_pattern(mut self, pattern: &str) -> Result<Self> {
        self.conditions.caller_pattern =
            Some(Regex::new(pattern).map_err(|e| CallEngineError::InvalidRule {
                rule: self.name.clone(),
                message: e.to_string(),
            })?);
        Ok(self)
    }

    pub fn with_callee_pattern(mut self, pattern: &str) -> Result<Self> {
        self.conditions.callee_pattern =
            Some(Regex::new(pattern).map_err(|e| CallEngineError::InvalidRule {
                rule: self.name.clone(),
                message: e.to_string(),
            })?);
        Ok(self)
    }

    pub fn with_time_window(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.conditions.time_window = Some((start, end));
        self
    }

    pub fn with_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.conditions.days = Some(days.into_iter().collect());
        self
    }
}

/// Router with screening lists and prioritized rules.
#[derive(Debug, Default)]
pub struct CallRouter {
    rules: Vec<RoutingRule>,
    pub blacklisted_numbers: HashSet<String>,
    pub whitelisted_numbers: HashSet<String>,
}

impl CallRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, keeping the list ordered by descending priority.
    pub fn add_rule(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != name);
        self.rules.len() != before
    }

    /// Decide how to handle a call.
    pub fn route(&self, session: &CallSession, now: DateTime<Local>) -> RoutingDecision {
        let caller = &session.caller.number;

        if self.blacklisted_numbers.contains(caller) {
            return RoutingDecision::Reject {
                reason: "caller_blacklisted".to_string(),
            };
        }

        if !self.whitelisted_numbers.is_empty() && !self.whitelisted_numbers.contains(caller) {
            return RoutingDecision::Reject {
                reason: "caller_not_whitelisted".to_string(),
            };
        }

        for rule in &self.rules {
            if rule.conditions.matches(session, now) {
                tracing::debug!(rule = %rule.name, call_id = %session.call_id, "routing rule matched");
                return rule.action.to_decision();
            }
        }

        RoutingDecision::Accept
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
