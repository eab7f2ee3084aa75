//! Priority SMS queue with rolling-window rate limits.
//!
//! Ordering is (priority desc, enqueue order asc). Global and per-number
//! rate limits are enforced over a 60-second rolling window at enqueue
//! time. Expired messages are skipped on dequeue. The heap and the id
//! lookup mutate together under one lock.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, SmsError};
use crate::message::{SmsMessage, SmsPriority};

const RATE_WINDOW: Duration = Duration::from_secs(60);

struct QueuedItem {
    priority: SmsPriority,
    seq: u64,
    message: SmsMessage,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<QueuedItem>,
    queued_ids: HashSet<String>,
    removed_ids: HashSet<String>,
    per_number: HashMap<String, Vec<Instant>>,
    global: Vec<Instant>,
    next_seq: u64,
    total_enqueued: u64,
    total_dequeued: u64,
    total_dropped: u64,
    expired_skipped: u64,
}

/// The queue. All operations take one lock.
pub struct SmsQueue {
    max_size: usize,
    global_rate_per_min: usize,
    per_number_rate_per_min: usize,
    inner: Mutex<Inner>,
}

impl SmsQueue {
    pub fn new(max_size: usize, global_rate_per_min: usize, per_number_rate_per_min: usize) -> Self {
        Self {
            max_size,
            global_rate_per_min,
            per_number_rate_per_min,
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                queued_ids: HashSet::new(),
                removed_ids: HashSet::new(),
                per_number: HashMap::new(),
                global: Vec::new(),
                next_seq: 0,
                total_enqueued: 0,
                total_dequeued: 0,
                total_dropped: 0,
                expired_skipped: 0,
            }),
        }
    }

    /// Enqueue with capacity and rate-limit checks.
    pub fn enqueue(&self, message: SmsMessage, now: Instant) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.queued_ids.len() >= self.max_size {
            inner.total_dropped += 1;
            return Err(SmsError::QueueFull);
        }

        let cutoff = now.checked_sub(RATE_WINDOW).unwrap_or(now);
        inner.global.retain(|&t| t > cutoff);
        if inner.global.len() >= self.global_rate_per_min {
            inner.total_dropped += 1;
            return Err(SmsError::RateLimited("global".to_string()));
        }

        let from = message.from_number.clone();
        let sends = inner.per_number.entry(from.clone()).or_default();
        sends.retain(|&t| t > cutoff);
        if sends.len() >= self.per_number_rate_per_min {
            inner.total_dropped += 1;
            return Err(SmsError::RateLimited(from));
        }
        sends.push(now);
        inner.global.push(now);

        self.push_item(inner, message);
        Ok(())
    }

    /// Re-enqueue a message for retry. Capacity still applies but the rate
    /// windows do not; retries were already accounted for at first send.
    pub fn requeue(&self, message: SmsMessage) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.queued_ids.len() >= self.max_size {
            inner.total_dropped += 1;
            return Err(SmsError::QueueFull);
        }
        self.push_item(inner, message);
        Ok(())
    }

    fn push_item(&self, inner: &mut Inner, message: SmsMessage) {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queued_ids.insert(message.message_id.clone());
        inner.removed_ids.remove(&message.message_id);
        inner.heap.push(QueuedItem {
            priority: message.priority,
            seq,
            message,
        });
        inner.total_enqueued += 1;
    }

    /// Pop the highest-priority live message, skipping expired and removed
    /// entries.
    pub fn dequeue(&self, now: Instant) -> Option<SmsMessage> {
        let mut inner = self.inner.lock();
        while let Some(item) = inner.heap.pop() {
            let id = item.message.message_id.clone();
            inner.queued_ids.remove(&id);

            if inner.removed_ids.remove(&id) {
                continue;
            }
            if item.message.is_expired(now) {
                inner.expired_skipped += 1;
                tracing::debug!(message_id = %id, "skipping expired SMS");
                continue;
            }

            inner.total_dequeued += 1;
            return Some(item.message);
        }
        None
    }

    /// Mark a queued message as removed; it is discarded on dequeue.
    pub fn remove(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.queued_ids.contains(message_id) {
            inner.removed_ids.insert(message_id.to_string());
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queued_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    /// (enqueued, dequeued, dropped, expired-skipped) counters.
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        let inner = self.inner.lock();
        (
            inner.total_enqueued,
            inner.total_dequeued,
            inner.total_dropped,
            inner.expired_skipped,
        )
    }
}
