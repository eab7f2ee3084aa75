//! The SMS message model.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Pending,
    Queued,
    Sending,
    Sent,
    Delivered,
    Failed,
    Expired,
}

impl SmsStatus {
    /// Delivered and Failed are final; Expired is final too but reached
    /// only by the sweeper.
    pub fn is_final(&self) -> bool {
        matches!(self, SmsStatus::Delivered | SmsStatus::Failed | SmsStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SmsStatus::Pending => "pending",
            SmsStatus::Queued => "queued",
            SmsStatus::Sending => "sending",
            SmsStatus::Sent => "sent",
            SmsStatus::Delivered => "delivered",
            SmsStatus::Failed => "failed",
            SmsStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsEncoding {
    Gsm7,
    Ucs2,
    Utf8,
}

impl SmsEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsEncoding::Gsm7 => "gsm7",
            SmsEncoding::Ucs2 => "ucs2",
            SmsEncoding::Utf8 => "utf8",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// One SMS, inbound or outbound.
#[derive(Debug, Clone)]
pub struct SmsMessage {
    pub message_id: String,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub direction: SmsDirection,
    pub status: SmsStatus,
    pub priority: SmsPriority,
    pub encoding: SmsEncoding,
    /// Derived from body length and encoding.
    pub segments: u32,
    pub created_at: Instant,
    pub created_wall: DateTime<Utc>,
    pub expires_at: Instant,
    pub retry_count: u32,
    pub max_retries: u32,
    pub sip_headers: HashMap<String, String>,
    pub error_message: Option<String>,
}

impl SmsMessage {
    pub fn new(
        from_number: &str,
        to_number: &str,
        body: &str,
        direction: SmsDirection,
        expiry: Duration,
    ) -> Self {
        let encoding = detect_encoding(body);
        let now = Instant::now();
        Self {
            message_id: format!("sms_{}", Uuid::new_v4()),
            from_number: from_number.to_string(),
            to_number: to_number.to_string(),
            body: body.to_string(),
            direction,
            status: SmsStatus::Pending,
            priority: SmsPriority::Normal,
            encoding,
            segments: calculate_segments(body.chars().count(), encoding),
            created_at: now,
            created_wall: Utc::now(),
            expires_at: now + expiry,
            retry_count: 0,
            max_retries: 3,
            sip_headers: HashMap::new(),
            error_message: None,
        }
    }

    pub fn with_priority(mut self, priority: SmsPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// ASCII bodies fit the GSM 7-bit default alphabet closely enough for
/// segment accounting; anything else is counted as UCS-2.
pub fn detect_encoding(body: &str) -> SmsEncoding {
    if body.is_ascii() {
        SmsEncoding::Gsm7
    } else {
        SmsEncoding::Ucs2
    }
}

/// Segment count: one segment up to the single-message limit, then the
/// reduced concatenated limit per segment (160/153 for GSM-7, 70/67
/// otherwise).
pub fn calculate_segments(char_count: usize, encoding: SmsEncoding) -> u32 {
    let (single, multi) = match encoding {
        SmsEncoding::Gsm7 => (160, 153),
        SmsEncoding::Ucs2 | SmsEncoding::Utf8 => (70, 67),
    };

    if char_count == 0 {
        1
    } else if char_count <= single {
        1
    } else {
        char_count.div_ceil(multi) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> SmsMessage {
        SmsMessage::new(
            "+1",
            "+2",
            body,
            SmsDirection::Outbound,
            Duration::from_secs(86400),
        )
    }

    #[test]
    fn ascii_bodies_use_gsm7_limits() {
        assert_eq!(message(&"a".repeat(160)).segments, 1);
        assert_eq!(message(&"a".repeat(161)).segments, 2);
        assert_eq!(message(&"a".repeat(306)).segments, 2);
        assert_eq!(message(&"a".repeat(307)).segments, 3);
    }

    #[test]
    fn unicode_bodies_use_ucs2_limits() {
        let msg = message(&"é".repeat(70));
        assert_eq!(msg.encoding, SmsEncoding::Ucs2);
        assert_eq!(msg.segments, 1);
        assert_eq!(message(&"é".repeat(71)).segments, 2);
        assert_eq!(message(&"é".repeat(134)).segments, 2);
        assert_eq!(message(&"é".repeat(135)).segments, 3);
    }

    #[test]
    fn empty_body_is_one_segment() {
        assert_eq!(message("").segments, 1);
    }

    #[test]
    fn expiry_and_retry_bookkeeping() {
        let mut msg = message("hello").with_max_retries(2);
        assert!(!msg.is_expired(Instant::now()));
        assert!(msg.is_expired(Instant::now() + Duration::from_secs(86401)));

        assert!(msg.can_retry());
        msg.retry_count = 2;
        assert!(!msg.can_retry());
    }

    #[test]
    fn final_statuses() {
        assert!(SmsStatus::Delivered.is_final());
        assert!(SmsStatus::Failed.is_final());
        assert!(SmsStatus::Expired.is_final());
        assert!(!SmsStatus::Sent.is_final());
        assert!(!SmsStatus::Queued.is_final());
    }
}
