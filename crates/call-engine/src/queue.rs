//! Bounded priority queue for calls routed to `queue` actions.
//!
//! Ordering is (priority desc, enqueue time asc). Calls that wait longer
//! than the admission timeout are evicted by [`CallQueue::cleanup_expired`]
//! and reported to the caller for rejection handling.

use std::time::{Duration, Instant};

use crate::types::CallSession;

struct QueuedCall {
    session: CallSession,
    queued_at: Instant,
}

/// Queue statistics snapshot.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub total_queued: usize,
    pub max_size: usize,
    pub average_wait: Duration,
}

/// A single named call queue.
pub struct CallQueue {
    max_size: usize,
    timeout: Duration,
    queued: Vec<QueuedCall>,
}

impl CallQueue {
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        Self {
            max_size,
            timeout,
            queued: Vec::new(),
        }
    }

    /// Add a call; fails when the queue is full.
    pub fn add_call(&mut self, session: CallSession, now: Instant) -> bool {
        if self.queued.len() >= self.max_size {
            tracing::warn!(call_id = %session.call_id, "call queue full");
            return false;
        }
        self.queued.push(QueuedCall {
            session,
            queued_at: now,
        });
        // Stable sort keeps FIFO order within a priority class.
        self.queued
            .sort_by(|a, b| b.session.priority.cmp(&a.session.priority));
        true
    }

    /// Remove and return the frontmost call.
    pub fn get_next_call(&mut self) -> Option<CallSession> {
        if self.queued.is_empty() {
            None
        } else {
            Some(self.queued.remove(0).session)
        }
    }

    /// Remove a specific call by id.
    pub fn remove_call(&mut self, call_id: &str) -> Option<CallSession> {
        let index = self
            .queued
            .iter()
            .position(|q| q.session.call_id == call_id)?;
        Some(self.queued.remove(index).session)
    }

    /// 1-based position of a call, if queued.
    pub fn get_position(&self, call_id: &str) -> Option<usize> {
        self.queued
            .iter()
            .position(|q| q.session.call_id == call_id)
            .map(|i| i + 1)
    }

    /// Evict calls older than the admission timeout and return them.
    pub fn cleanup_expired(&mut self, now: Instant) -> Vec<CallSession> {
        let timeout = self.timeout;
        let mut expired = Vec::new();
        self.queued.retain_mut(|q| {
            if now.duration_since(q.queued_at) > timeout {
                expired.push(q.session.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn stats(&self, now: Instant) -> QueueStats {
        let total_wait: Duration = self
            .queued
            .iter()
            .map(|q| now.duration_since(q.queued_at))
            .sum();
        let average_wait = if self.queued.is_empty() {
            Duration::ZERO
        } else {
            total_wait / self.queued.len() as u32
        };
        QueueStats {
            total_queued: self.queued.len(),
            max_size: self.max_size,
            average_wait,
        }
    }
}
