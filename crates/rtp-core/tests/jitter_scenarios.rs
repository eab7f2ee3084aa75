//! Jitter buffer behavior under the exact arrival patterns the playout
//! path has to survive: gaps, wraparound, duplicates under load.

use std::time::{Duration, Instant};

use bytes::Bytes;
use voxbridge_rtp_core::{JitterBuffer, JitterBufferConfig, RtpHeader, RtpPacket};

fn packet(seq: u16) -> RtpPacket {
    RtpPacket {
        header: RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 0,
            sequence_number: seq,
            timestamp: seq as u32 * 160,
            ssrc: 0xABCD,
        },
        payload: Bytes::from(vec![seq as u8; 160]),
    }
}

fn drain(jb: &mut JitterBuffer, now: Instant) -> Vec<u16> {
    let mut out = Vec::new();
    while let Some(p) = jb.next_ready(now) {
        out.push(p.header.sequence_number);
    }
    out
}

/// Packets 1,2,4,5,6 arrive at 0,20,40,60,80 ms with a 60 ms target
/// delay: 1 and 2 play immediately, the gap holds playback until the
/// window elapses, then 4,5,6 drain and the skip is recorded.
#[test]
fn gap_is_skipped_only_after_target_delay() {
    let mut jb = JitterBuffer::new(JitterBufferConfig {
        max_size: 50,
        target_delay: Duration::from_millis(60),
    });

    let t0 = Instant::now();
    jb.insert(packet(1), t0);
    jb.insert(packet(2), t0 + Duration::from_millis(20));
    jb.insert(packet(4), t0 + Duration::from_millis(40));
    jb.insert(packet(5), t0 + Duration::from_millis(60));
    jb.insert(packet(6), t0 + Duration::from_millis(80));

    let mid = t0 + Duration::from_millis(50);
    assert_eq!(drain(&mut jb, mid), vec![1, 2]);
    assert_eq!(jb.gaps_skipped(), 0);

    let after_window = t0 + Duration::from_millis(61);
    assert_eq!(drain(&mut jb, after_window), vec![4, 5, 6]);
    assert_eq!(jb.gaps_skipped(), 1);
    assert_eq!(jb.last_played_seq(), Some(6));
}

/// A stream crossing 65535 -> 0 keeps strict playout order.
#[test]
fn wraparound_preserves_ordering() {
    let mut jb = JitterBuffer::new(JitterBufferConfig::default());
    let t0 = Instant::now();

    jb.insert(packet(65533), t0);
    assert_eq!(jb.next_ready(t0).unwrap().header.sequence_number, 65533);

    // Deliver the wrap region out of order.
    for seq in [0u16, 65535, 1, 65534, 2] {
        jb.insert(packet(seq), t0);
    }
    assert_eq!(drain(&mut jb, t0), vec![65534, 65535, 0, 1, 2]);
}

/// Duplicates and overflow under a burst: the buffer never exceeds its
/// bound and `last_played_seq` never goes backwards.
#[test]
fn burst_with_duplicates_respects_bounds() {
    let mut jb = JitterBuffer::new(JitterBufferConfig {
        max_size: 8,
        target_delay: Duration::from_millis(60),
    });
    let t0 = Instant::now();

    for round in 0..3 {
        for seq in 0..16u16 {
            jb.insert(packet(seq), t0);
            assert!(jb.len() <= 8, "round {round}: buffer grew past max_size");
        }
    }
    assert!(jb.duplicates_dropped() > 0);
    assert!(jb.overflow_dropped() > 0);

    let late = t0 + Duration::from_millis(100);
    let order = drain(&mut jb, late);
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(order, sorted, "playout order regressed");
}
