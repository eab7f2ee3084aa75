//! Frame-level playout buffer for the AI-bound audio path.
//!
//! Smooths bursty decoded audio before it is framed onto the WebSocket. A
//! frame is released once it has aged past the target delay, or immediately
//! when the buffer is full.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded deque of audio frames with arrival stamps.
pub struct AudioBuffer {
    max_frames: usize,
    target_delay: Duration,
    frames: VecDeque<(Instant, Vec<u8>)>,
    total_bytes: usize,
}

impl AudioBuffer {
    pub fn new(max_frames: usize, target_delay: Duration) -> Self {
        Self {
            max_frames: max_frames.max(1),
            target_delay,
            frames: VecDeque::new(),
            total_bytes: 0,
        }
    }

    /// Append a frame, evicting the oldest when full.
    pub fn push_frame(&mut self, frame: Vec<u8>, now: Instant) {
        if self.frames.len() >= self.max_frames {
            if let Some((_, old)) = self.frames.pop_front() {
                self.total_bytes -= old.len();
            }
        }
        self.total_bytes += frame.len();
        self.frames.push_back((now, frame));
    }

    /// Release the next frame if it is old enough or the buffer is full.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Vec<u8>> {
        let (arrived, _) = self.frames.front()?;
        let aged = now.duration_since(*arrived) >= self.target_delay;

        if aged || self.frames.len() >= self.max_frames {
            let (_, frame) = self.frames.pop_front().expect("front checked");
            self.total_bytes -= frame.len();
            Some(frame)
        } else {
            None
        }
    }

    /// Drain every frame whose release condition holds.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(frame) = self.pop_ready(now) {
            out.push(frame);
        }
        out
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Fill ratio in `[0, 1]`.
    pub fn level(&self) -> f32 {
        self.frames.len() as f32 / self.max_frames as f32
    }
}
