//! Per-session RTP statistics.
//!
//! Loss is inferred from sequence gaps (with 16-bit wraparound); jitter is
//! the standard deviation of recent interarrival intervals.

use std::collections::VecDeque;
use std::time::Instant;

use crate::packet::RtpPacket;

const WINDOW: usize = 100;

/// Counters for one RTP session.
#[derive(Debug, Default)]
pub struct RtpStatistics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_lost: u64,
    pub jitter_ms: f64,
    last_sequence: Option<u16>,
    packet_times: VecDeque<Instant>,
}

impl RtpStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, packet_size: usize) {
        self.packets_sent += 1;
        self.bytes_sent += packet_size as u64;
    }

    pub fn record_received(&mut self, packet: &RtpPacket, now: Instant) {
        self.packets_received += 1;
        self.bytes_received += packet.payload.len() as u64;

        if self.packet_times.len() >= WINDOW {
            self.packet_times.pop_front();
        }
        self.packet_times.push_back(now);

        let seq = packet.header.sequence_number;
        if let Some(last) = self.last_sequence {
            let expected = last.wrapping_add(1);
            if seq != expected {
                let lost = seq.wrapping_sub(expected) as u64;
                self.packets_lost += lost;
            }
        }
        self.last_sequence = Some(seq);

        self.update_jitter();
    }

    fn update_jitter(&mut self) {
        if self.packet_times.len() < 2 {
            return;
        }
        let intervals: Vec<f64> = self
            .packet_times
            .iter()
            .zip(self.packet_times.iter().skip(1))
            .map(|(a, b)| b.duration_since(*a).as_secs_f64())
            .collect();

        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance = intervals
            .iter()
            .map(|x| (x - mean) * (x - mean))
            .sum::<f64>()
            / intervals.len() as f64;
        self.jitter_ms = variance.sqrt() * 1000.0;
    }

    /// Fraction of expected packets that never arrived.
    pub fn loss_rate(&self) -> f64 {
        let expected = self.packets_received + self.packets_lost;
        if expected == 0 {
            0.0
        } else {
            self.packets_lost as f64 / expected as f64
        }
    }
}
