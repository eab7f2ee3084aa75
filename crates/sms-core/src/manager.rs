//! SMS delivery pipeline.
//!
//! Outbound messages are validated, queued, and drained by a worker that
//! keeps at most `max_concurrent` sends in flight. Each send becomes a SIP
//! MESSAGE through the [`SmsTransport`]; acceptance moves the message to
//! `Sent` and arms a delivery-timeout that promotes it to `Delivered`
//! unless an explicit report arrives first. Failures retry on an interval
//! until `max_retries` is exhausted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use voxbridge_infra_common::events::{topics, Event, EventBus};
use voxbridge_infra_common::sms_span;

use crate::error::{Result, SmsError};
use crate::message::{SmsDirection, SmsMessage, SmsPriority, SmsStatus};
use crate::queue::SmsQueue;

/// Result of handing one message to the signaling plane.
#[derive(Debug, Clone)]
pub struct SmsSendResult {
    pub success: bool,
    pub error: Option<String>,
}

impl SmsSendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// How SMS leaves the process. Implemented over the signaling adapter.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_sip_message(
        &self,
        to_uri: &str,
        from_uri: &str,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> SmsSendResult;
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct SmsManagerConfig {
    /// Domain used when building `sip:` URIs.
    pub domain: String,
    pub queue_max: usize,
    pub global_rate_per_min: usize,
    pub per_number_rate_per_min: usize,
    pub expiry: Duration,
    pub retry_interval: Duration,
    pub delivery_timeout: Duration,
    pub max_concurrent: usize,
    pub default_max_retries: u32,
}

impl Default for SmsManagerConfig {
    fn default() -> Self {
        Self {
            domain: "voxbridge.local".to_string(),
            queue_max: 10000,
            global_rate_per_min: 100,
            per_number_rate_per_min: 10,
            expiry: Duration::from_secs(24 * 3600),
            retry_interval: Duration::from_secs(300),
            delivery_timeout: Duration::from_secs(1800),
            max_concurrent: 5,
            default_max_retries: 3,
        }
    }
}

/// Owner of all SMS records and the delivery worker.
pub struct SmsManager {
    self_ref: Weak<SmsManager>,
    config: SmsManagerConfig,
    queue: SmsQueue,
    messages: DashMap<String, SmsMessage>,
    transport: Arc<dyn SmsTransport>,
    events: Arc<EventBus>,
    in_flight: Arc<Semaphore>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    send_attempts: AtomicU64,
}

impl SmsManager {
    pub fn new(
        config: SmsManagerConfig,
        transport: Arc<dyn SmsTransport>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            queue: SmsQueue::new(
                config.queue_max,
                config.global_rate_per_min,
                config.per_number_rate_per_min,
            ),
            messages: DashMap::new(),
            transport,
            events,
            in_flight: Arc::new(Semaphore::new(config.max_concurrent)),
            worker: parking_lot::Mutex::new(None),
            shutdown_tx,
            send_attempts: AtomicU64::new(0),
            config,
        })
    }

    /// Validate, record, and queue an outbound message. Returns its id.
    pub async fn send_sms(
        &self,
        from_number: &str,
        to_number: &str,
        body: &str,
        priority: SmsPriority,
    ) -> Result<String> {
        validate_input(from_number, to_number, body)?;

        let message = SmsMessage::new(
            from_number,
            to_number,
            body,
            SmsDirection::Outbound,
            self.config.expiry,
        )
        .with_priority(priority)
        .with_max_retries(self.config.default_max_retries);
        let message_id = message.message_id.clone();

        self.queue.enqueue(message.clone(), Instant::now())?;
        self.messages.insert(message_id.clone(), message);
        self.set_status(&message_id, SmsStatus::Queued).await;

        tracing::info!(message_id = %message_id, from = from_number, to = to_number, "SMS queued");
        Ok(message_id)
    }

    /// Record an inbound message (already delivered to us by definition).
    pub async fn receive_sms(
        &self,
        from_number: &str,
        to_number: &str,
        body: &str,
        sip_headers: HashMap<String, String>,
    ) -> SmsMessage {
        let mut message = SmsMessage::new(
            from_number,
            to_number,
            body,
            SmsDirection::Inbound,
            self.config.expiry,
        );
        message.status = SmsStatus::Delivered;
        message.sip_headers = sip_headers;

        self.messages
            .insert(message.message_id.clone(), message.clone());
        self.events
            .emit(Event::new(
                topics::SMS_RECEIVED,
                json!({
                    "message_id": message.message_id,
                    "from": from_number,
                    "to": to_number,
                    "segments": message.segments,
                }),
            ))
            .await;
        message
    }

    /// Dequeue and attempt one delivery. Returns false when the queue was
    /// empty. The worker loop calls this; tests can drive it directly.
    pub async fn process_next(&self) -> bool {
        let Some(queued) = self.queue.dequeue(Instant::now()) else {
            return false;
        };
        // The map copy carries current retry bookkeeping.
        let message = self
            .messages
            .get(&queued.message_id)
            .map(|m| m.clone())
            .unwrap_or(queued);
        self.attempt_send(message).await;
        true
    }

    async fn attempt_send(&self, message: SmsMessage) {
        let span = sms_span(&message.message_id);
        async {
            let message_id = message.message_id.clone();
            self.set_status(&message_id, SmsStatus::Sending).await;
            self.send_attempts.fetch_add(1, Ordering::Relaxed);

            let to_uri = format!("sip:{}@{}", message.to_number, self.config.domain);
            let from_uri = format!("sip:{}@{}", message.from_number, self.config.domain);
            let headers = self.sip_headers_for(&message);

            let result = self
                .transport
                .send_sip_message(&to_uri, &from_uri, &message.body, &headers)
                .await;

            if result.success {
                self.set_status(&message_id, SmsStatus::Sent).await;
                self.arm_delivery_timeout(message_id);
            } else {
                let error = result.error.unwrap_or_else(|| "send failed".to_string());
                self.handle_send_failure(&message_id, &error).await;
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_send_failure(&self, message_id: &str, error: &str) {
        let retry = {
            let Some(mut entry) = self.messages.get_mut(message_id) else {
                return;
            };
            entry.error_message = Some(error.to_string());
            if entry.can_retry() && !entry.is_expired(Instant::now()) {
                entry.retry_count += 1;
                true
            } else {
                false
            }
        };

        if !retry {
            tracing::warn!(message_id, error, "SMS failed permanently");
            self.set_status(message_id, SmsStatus::Failed).await;
            return;
        }

        tracing::info!(message_id, error, "SMS send failed, scheduling retry");
        if self.config.retry_interval.is_zero() {
            self.requeue_for_retry(message_id).await;
        } else {
            let weak = self.self_ref.clone();
            let message_id = message_id.to_string();
            let delay = self.config.retry_interval;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(manager) = weak.upgrade() {
                    manager.requeue_for_retry(&message_id).await;
                }
            });
        }
    }

    async fn requeue_for_retry(&self, message_id: &str) {
        let Some(message) = self.messages.get(message_id).map(|m| m.clone()) else {
            return;
        };
        if self.queue.requeue(message).is_ok() {
            self.set_status(message_id, SmsStatus::Queued).await;
        } else {
            self.set_status(message_id, SmsStatus::Failed).await;
        }
    }

    fn arm_delivery_timeout(&self, message_id: String) {
        let weak = self.self_ref.clone();
        let timeout = self.config.delivery_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = weak.upgrade() {
                manager.apply_delivery_timeout(&message_id).await;
            }
        });
    }

    /// Put a failed message back on the queue with a fresh retry budget.
    pub async fn retry_failed_message(&self, message_id: &str) -> Result<()> {
        let message = {
            let mut entry = self
                .messages
                .get_mut(message_id)
                .ok_or_else(|| SmsError::UnknownMessage(message_id.to_string()))?;
            if entry.status != SmsStatus::Failed {
                return Err(SmsError::Validation(format!(
                    "message {message_id} is {} and cannot be retried",
                    entry.status.as_str()
                )));
            }
            entry.retry_count = 0;
            entry.error_message = None;
            entry.clone()
        };

        self.queue.requeue(message)?;
        self.set_status(message_id, SmsStatus::Queued).await;
        Ok(())
    }

    /// Cancel a message that has not left the pipeline yet. Messages that
    /// were already accepted by the signaling plane cannot be recalled.
    pub async fn cancel_message(&self, message_id: &str) -> Result<()> {
        {
            let mut entry = self
                .messages
                .get_mut(message_id)
                .ok_or_else(|| SmsError::UnknownMessage(message_id.to_string()))?;
            if matches!(entry.status, SmsStatus::Sent | SmsStatus::Delivered) {
                return Err(SmsError::Validation(format!(
                    "message {message_id} was already sent"
                )));
            }
            entry.error_message = Some("cancelled".to_string());
        }

        self.queue.remove(message_id);
        self.set_status(message_id, SmsStatus::Failed).await;
        Ok(())
    }

    /// Promote a still-`Sent` message to `Delivered`. Fired by the
    /// delivery-timeout task; no-op after an explicit report.
    pub async fn apply_delivery_timeout(&self, message_id: &str) {
        let still_sent = self
            .messages
            .get(message_id)
            .map(|m| m.status == SmsStatus::Sent)
            .unwrap_or(false);
        if still_sent {
            self.set_status(message_id, SmsStatus::Delivered).await;
        }
    }

    /// Whether an inbound MESSAGE is a delivery report rather than content.
    pub fn is_delivery_report(headers: &HashMap<String, String>, body: &str) -> bool {
        const REPORT_HEADERS: [&str; 3] =
            ["X-Delivery-Report", "X-SMS-Status", "Disposition-Notification-To"];
        if REPORT_HEADERS.iter().any(|h| headers.contains_key(*h)) {
            return true;
        }
        let lowered = body.to_lowercase();
        lowered.starts_with("delivery report") || lowered.contains("message-status:")
    }

    /// Apply a delivery report to its original message. Returns the
    /// original id when one was found and updated.
    pub async fn process_delivery_report(
        &self,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> Option<String> {
        let original_id = ["X-Original-SMS-ID", "X-SMS-ID", "Message-ID"]
            .iter()
            .find_map(|h| headers.get(*h))
            .cloned()?;

        let reported = headers
            .get("X-SMS-Status")
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| body.to_lowercase());
        let status = if reported.contains("fail") {
            SmsStatus::Failed
        } else {
            SmsStatus::Delivered
        };

        if !self.messages.contains_key(&original_id) {
            tracing::debug!(original_id = %original_id, "delivery report for unknown message");
            return None;
        }
        self.set_status(&original_id, status).await;
        Some(original_id)
    }

    /// Mark unterminated messages past their expiry. Returns the count.
    pub async fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .messages
            .iter()
            .filter(|e| !e.status.is_final() && e.is_expired(now))
            .map(|e| e.message_id.clone())
            .collect();

        for message_id in &expired {
            self.queue.remove(message_id);
            self.set_status(message_id, SmsStatus::Expired).await;
        }
        expired.len()
    }

    async fn set_status(&self, message_id: &str, new_status: SmsStatus) {
        let old_status = {
            let Some(mut entry) = self.messages.get_mut(message_id) else {
                return;
            };
            let old = entry.status;
            entry.status = new_status;
            old
        };

        if old_status != new_status {
            tracing::debug!(message_id, from = old_status.as_str(), to = new_status.as_str(), "SMS status change");
            self.events
                .emit(Event::new(
                    topics::SMS_STATUS_CHANGED,
                    json!({
                        "message_id": message_id,
                        "old_status": old_status.as_str(),
                        "status": new_status.as_str(),
                    }),
                ))
                .await;
        }
    }

    fn sip_headers_for(&self, message: &SmsMessage) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("X-SMS-ID".to_string(), message.message_id.clone());
        headers.insert("X-SMS-Segments".to_string(), message.segments.to_string());
        headers.insert(
            "X-SMS-Encoding".to_string(),
            message.encoding.as_str().to_string(),
        );
        headers.insert(
            "Content-Type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        );
        headers
    }

    /// Start the delivery worker.
    pub fn start_worker(&self) {
        let mut slot = self.worker.lock();
        if slot.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }

        let weak = self.self_ref.clone();
        let in_flight = self.in_flight.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(50));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        loop {
                            let Ok(permit) = in_flight.clone().try_acquire_owned() else {
                                break;
                            };
                            let Some(queued) = manager.queue.dequeue(Instant::now()) else {
                                drop(permit);
                                break;
                            };
                            let message = manager
                                .messages
                                .get(&queued.message_id)
                                .map(|m| m.clone())
                                .unwrap_or(queued);
                            let manager = manager.clone();
                            tokio::spawn(async move {
                                manager.attempt_send(message).await;
                                drop(permit);
                            });
                        }
                    }
                }
            }
        }));
    }

    /// Stop the worker; queued messages stay queued.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    pub fn get_message(&self, message_id: &str) -> Option<SmsMessage> {
        self.messages.get(message_id).map(|m| m.clone())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn send_attempt_count(&self) -> u64 {
        self.send_attempts.load(Ordering::Relaxed)
    }

    /// Message counts by status.
    pub fn status_breakdown(&self) -> HashMap<&'static str, usize> {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for entry in self.messages.iter() {
            *counts.entry(entry.status.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

fn validate_input(from_number: &str, to_number: &str, body: &str) -> Result<()> {
    if body.is_empty() {
        return Err(SmsError::Validation("empty message body".to_string()));
    }
    if body.chars().count() > 1600 {
        return Err(SmsError::Validation(
            "message too long (max 1600 characters)".to_string(),
        ));
    }
    let number = Regex::new(r"^\+?\d{3,20}$").expect("static regex");
    for (label, value) in [("from", from_number), ("to", to_number)] {
        if !number.is_match(value) {
            return Err(SmsError::Validation(format!(
                "invalid {label} number: {value}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct ScriptedTransport {
        results: PlMutex<Vec<SmsSendResult>>,
        sent: PlMutex<Vec<(String, HashMap<String, String>)>>,
    }

    impl ScriptedTransport {
        fn failing() -> Arc<Self> {
            Arc::new(Self {
                results: PlMutex::new(Vec::new()),
                sent: PlMutex::new(Vec::new()),
            })
        }

        fn with_results(results: Vec<SmsSendResult>) -> Arc<Self> {
            Arc::new(Self {
                results: PlMutex::new(results),
                sent: PlMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SmsTransport for ScriptedTransport {
        async fn send_sip_message(
            &self,
            to_uri: &str,
            _from_uri: &str,
            _body: &str,
            headers: &HashMap<String, String>,
        ) -> SmsSendResult {
            self.sent
                .lock()
                .push((to_uri.to_string(), headers.clone()));
            let mut results = self.results.lock();
            if results.is_empty() {
                SmsSendResult::failed("kamailio rejected")
            } else {
                results.remove(0)
            }
        }
    }

    fn config_for_tests() -> SmsManagerConfig {
        SmsManagerConfig {
            retry_interval: Duration::ZERO,
            default_max_retries: 2,
            ..Default::default()
        }
    }

    fn status_recorder(events: &EventBus) -> Arc<PlMutex<Vec<String>>> {
        let statuses = Arc::new(PlMutex::new(Vec::new()));
        let clone = statuses.clone();
        events.on(topics::SMS_STATUS_CHANGED, move |event| {
            if let Some(status) = event.payload.get("status").and_then(|s| s.as_str()) {
                clone.lock().push(status.to_string());
            }
            Ok(())
        });
        statuses
    }

    #[tokio::test]
    async fn three_failed_attempts_exhaust_two_retries() {
        let events = Arc::new(EventBus::new());
        let statuses = status_recorder(&events);
        let transport = ScriptedTransport::failing();
        let manager = SmsManager::new(config_for_tests(), transport.clone(), events);

        let id = manager
            .send_sms("+1", "+2", "hello", SmsPriority::Normal)
            .await
            .unwrap();

        // Drive the pipeline by hand: attempt, retry, retry, fail.
        assert!(manager.process_next().await);
        assert!(manager.process_next().await);
        assert!(manager.process_next().await);
        assert!(!manager.process_next().await);

        assert_eq!(manager.send_attempt_count(), 3);
        assert_eq!(manager.get_message(&id).unwrap().status, SmsStatus::Failed);
        assert_eq!(
            statuses.lock().as_slice(),
            [
                "queued", "sending", "queued", "sending", "queued", "sending", "failed"
            ]
        );
    }

    #[tokio::test]
    async fn successful_send_carries_required_headers() {
        let events = Arc::new(EventBus::new());
        let transport = ScriptedTransport::with_results(vec![SmsSendResult::ok()]);
        let manager = SmsManager::new(config_for_tests(), transport.clone(), events);

        let id = manager
            .send_sms("+15551234", "+15556789", "hi there", SmsPriority::Normal)
            .await
            .unwrap();
        assert!(manager.process_next().await);

        let sent = transport.sent.lock();
        let (to_uri, headers) = &sent[0];
        assert_eq!(to_uri, "sip:+15556789@voxbridge.local");
        assert_eq!(headers.get("X-SMS-ID").unwrap(), &id);
        assert_eq!(headers.get("X-SMS-Segments").unwrap(), "1");
        assert_eq!(
            headers.get("Content-Type").unwrap(),
            "text/plain; charset=utf-8"
        );
        drop(sent);

        assert_eq!(manager.get_message(&id).unwrap().status, SmsStatus::Sent);

        // No report arrived: the delivery timeout promotes to Delivered.
        manager.apply_delivery_timeout(&id).await;
        assert_eq!(
            manager.get_message(&id).unwrap().status,
            SmsStatus::Delivered
        );
    }

    #[tokio::test]
    async fn delivery_report_flips_status() {
        let events = Arc::new(EventBus::new());
        let transport = ScriptedTransport::with_results(vec![SmsSendResult::ok()]);
        let manager = SmsManager::new(config_for_tests(), transport, events);

        let id = manager
            .send_sms("+1", "+2", "ping", SmsPriority::Normal)
            .await
            .unwrap();
        manager.process_next().await;

        let mut headers = HashMap::new();
        headers.insert("X-Original-SMS-ID".to_string(), id.clone());
        headers.insert("X-SMS-Status".to_string(), "failed".to_string());
        assert!(SmsManager::is_delivery_report(&headers, ""));

        let updated = manager.process_delivery_report(&headers, "").await;
        assert_eq!(updated, Some(id.clone()));
        assert_eq!(manager.get_message(&id).unwrap().status, SmsStatus::Failed);
    }

    #[tokio::test]
    async fn validation_rejects_bad_input() {
        let events = Arc::new(EventBus::new());
        let manager =
            SmsManager::new(config_for_tests(), ScriptedTransport::failing(), events);

        assert!(manager
            .send_sms("", "+2", "x", SmsPriority::Normal)
            .await
            .is_err());
        assert!(manager
            .send_sms("+1", "not-a-number", "x", SmsPriority::Normal)
            .await
            .is_err());
        assert!(manager
            .send_sms("+1", "+2", "", SmsPriority::Normal)
            .await
            .is_err());
        assert!(manager
            .send_sms("+1", "+2", &"x".repeat(1601), SmsPriority::Normal)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn expiry_sweep_marks_unfinished_messages() {
        let events = Arc::new(EventBus::new());
        let manager =
            SmsManager::new(config_for_tests(), ScriptedTransport::failing(), events);

        let id = manager
            .send_sms("+1", "+2", "will expire", SmsPriority::Normal)
            .await
            .unwrap();

        let later = Instant::now() + Duration::from_secs(24 * 3600 + 1);
        assert_eq!(manager.sweep_expired(later).await, 1);
        assert_eq!(manager.get_message(&id).unwrap().status, SmsStatus::Expired);

        // Expired messages never dequeue.
        assert!(!manager.process_next().await);
    }

    #[tokio::test]
    async fn failed_messages_can_be_retried_manually() {
        let events = Arc::new(EventBus::new());
        let config = SmsManagerConfig {
            retry_interval: Duration::ZERO,
            default_max_retries: 0,
            ..Default::default()
        };
        let manager = SmsManager::new(config, ScriptedTransport::failing(), events);

        assert!(matches!(
            manager.retry_failed_message("ghost").await,
            Err(SmsError::UnknownMessage(_))
        ));

        let id = manager
            .send_sms("+1", "+2", "try again", SmsPriority::Normal)
            .await
            .unwrap();

        // Not failed yet: a queued message cannot be retried.
        assert!(matches!(
            manager.retry_failed_message(&id).await,
            Err(SmsError::Validation(_))
        ));

        // Zero retries: the first failure is final.
        assert!(manager.process_next().await);
        assert_eq!(manager.get_message(&id).unwrap().status, SmsStatus::Failed);

        manager.retry_failed_message(&id).await.unwrap();
        let message = manager.get_message(&id).unwrap();
        assert_eq!(message.status, SmsStatus::Queued);
        assert_eq!(message.retry_count, 0);
        assert!(message.error_message.is_none());

        // The retried message goes through another real attempt.
        assert!(manager.process_next().await);
        assert_eq!(manager.send_attempt_count(), 2);
    }

    #[tokio::test]
    async fn cancel_rejects_unknown_and_sent_messages() {
        let events = Arc::new(EventBus::new());
        let transport = ScriptedTransport::with_results(vec![SmsSendResult::ok()]);
        let manager = SmsManager::new(config_for_tests(), transport, events);

        assert!(matches!(
            manager.cancel_message("ghost").await,
            Err(SmsError::UnknownMessage(_))
        ));

        // A queued message cancels cleanly and never dequeues.
        let id = manager
            .send_sms("+1", "+2", "never mind", SmsPriority::Normal)
            .await
            .unwrap();
        manager.cancel_message(&id).await.unwrap();
        assert_eq!(manager.get_message(&id).unwrap().status, SmsStatus::Failed);
        assert!(!manager.process_next().await);

        // A sent message is past the point of no return.
        let sent_id = manager
            .send_sms("+1", "+2", "already gone", SmsPriority::Normal)
            .await
            .unwrap();
        assert!(manager.process_next().await);
        assert_eq!(
            manager.get_message(&sent_id).unwrap().status,
            SmsStatus::Sent
        );
        assert!(matches!(
            manager.cancel_message(&sent_id).await,
            Err(SmsError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn inbound_messages_are_recorded_delivered() {
        let events = Arc::new(EventBus::new());
        let manager =
            SmsManager::new(config_for_tests(), ScriptedTransport::failing(), events);

        let message = manager
            .receive_sms("+7", "+8", "inbound hello", HashMap::new())
            .await;
        assert_eq!(message.status, SmsStatus::Delivered);
        assert_eq!(message.direction, SmsDirection::Inbound);
        assert!(manager.get_message(&message.message_id).is_some());
    }
}
