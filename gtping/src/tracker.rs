//! Send-time bookkeeping and round trip statistics.
//!
//! Send times live in a fixed ring indexed by `seq % SLOTS`. A reply whose
//! sequence is `SLOTS` or more sends behind the next one to go out no longer
//! has a trustworthy slot and is reported as stale, so memory stays bounded
//! no matter how many requests are lost.

use std::fmt;

use serde::Serialize;

/// Ring capacity.
pub const SLOTS: usize = 1000;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    send_time: f64,
    delivered: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyClass {
    /// First reply for a tracked request.
    Fresh,
    /// Another reply for a request already matched.
    Duplicate,
    /// Too old (or never sent) to have a send time.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reply {
    pub class: ReplyClass,
    /// Sequence number widened back to the sender's running counter.
    pub sequence: u32,
    /// Round trip in seconds, `None` when unmeasurable.
    pub latency: Option<f64>,
}

/// Running RTT aggregate: count, sum and sum of squares, min, max.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    samples: u64,
    sum: f64,
    sum_squares: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.samples += 1;
        self.sum += value;
        self.sum_squares += value * value;
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn mean(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum / self.samples as f64)
    }

    /// `None` until the first sample.
    pub fn summary(&self) -> Option<Summary> {
        let (min, max, mean) = (self.min?, self.max?, self.mean()?);
        let n = self.samples as f64;
        // Population deviation from the running sums. Rounding can push the
        // difference a hair below zero for identical samples.
        let variance =
            ((self.sum_squares - self.sum * self.sum / n) / n).max(0.0);
        Some(Summary {
            count: self.samples,
            min,
            max,
            mean,
            mdev: variance.sqrt(),
        })
    }
}

/// RTT summary in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub mdev: f64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            1000.0 * self.min,
            1000.0 * self.mean,
            1000.0 * self.max,
            1000.0 * self.mdev
        )
    }
}

#[derive(Debug)]
pub struct RttTracker {
    slots: Vec<Slot>,
    /// Next sequence the prober will assign.
    next_seq: u32,
    highest_seen: Option<u32>,
    duplicates: u32,
    reorders: u32,
    stats: Statistics,
}

impl Default for RttTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RttTracker {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::default(); SLOTS],
            next_seq: 0,
            highest_seen: None,
            duplicates: 0,
            reorders: 0,
            stats: Statistics::new(),
        }
    }

    // Widened sequence: 65536 is not a multiple of SLOTS
    fn index(seq: u32) -> usize {
        seq as usize % SLOTS
    }

    /// Remember when `seq` went out, overwriting whatever the slot held.
    pub fn record_send(&mut self, seq: u32, time: f64) {
        self.slots[Self::index(seq)] = Slot {
            send_time: time,
            delivered: 0,
        };
        self.next_seq = seq.wrapping_add(1);
    }

    /// Classify a reply carrying wire sequence `seq` received at `now`.
    pub fn observe_reply(&mut self, seq: u16, now: f64) -> Reply {
        // Distance back from the next sequence, on the 16 bit wire field.
        // Zero means the sequence has not been sent yet.
        let behind = (self.next_seq as u16).wrapping_sub(seq);
        let sequence = self.next_seq.wrapping_sub(behind as u32);
        if behind == 0 || behind as usize >= SLOTS {
            return Reply {
                class: ReplyClass::Stale,
                sequence,
                latency: None,
            };
        }

        let slot = &mut self.slots[Self::index(sequence)];
        let latency = now - slot.send_time;
        let class = if slot.delivered > 0 {
            self.duplicates += 1;
            ReplyClass::Duplicate
        } else {
            self.stats.update(latency);
            ReplyClass::Fresh
        };
        slot.delivered += 1;

        Reply {
            class,
            sequence,
            latency: Some(latency),
        }
    }

    /// For fresh replies only. Returns true if `sequence` arrived after a
    /// later one.
    pub fn detect_reorder(&mut self, sequence: u32) -> bool {
        match self.highest_seen {
            Some(highest) if sequence < highest => {
                self.reorders += 1;
                true
            }
            _ => {
                self.highest_seen = Some(sequence);
                false
            }
        }
    }

    pub fn duplicates(&self) -> u32 {
        self.duplicates
    }

    pub fn reorders(&self) -> u32 {
        self.reorders
    }

    pub fn mean(&self) -> Option<f64> {
        self.stats.mean()
    }

    pub fn samples(&self) -> u64 {
        self.stats.samples()
    }

    pub fn summary(&self) -> Option<Summary> {
        self.stats.summary()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn stats_test() {
        let mut stats = Statistics::new();
        for v in 1..=10 {
            stats.update(v as f64);
        }
        let summary = stats.summary().unwrap();
        assert_eq!(summary.mean, 5.5);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 10.0);
        assert_eq!(summary.count, 10);
        // Population variance of 1..=10 is 8.25
        assert!((summary.mdev - 8.25f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_has_no_data() {
        assert!(Statistics::new().summary().is_none());
        assert!(RttTracker::new().summary().is_none());
    }

    #[test]
    fn single_sample_summary() {
        let mut stats = Statistics::new();
        stats.update(0.0123);
        let summary = stats.summary().unwrap();
        assert_eq!(summary.min, 0.0123);
        assert_eq!(summary.max, 0.0123);
        assert_eq!(summary.mean, 0.0123);
        assert_eq!(summary.mdev, 0.0);
    }

    #[test]
    fn identical_samples_do_not_produce_nan() {
        let mut stats = Statistics::new();
        for _ in 0..7 {
            stats.update(0.1);
        }
        assert!(!stats.summary().unwrap().mdev.is_nan());
    }

    #[test]
    fn reply_at_send_instant_is_fresh_with_zero_latency() {
        let mut tracker = RttTracker::new();
        for seq in [0u32, 1, 999, 1000, 65535, 65536, 70000] {
            tracker.record_send(seq, 42.5);
            let reply = tracker.observe_reply(seq as u16, 42.5);
            assert_eq!(reply.class, ReplyClass::Fresh);
            assert_eq!(reply.sequence, seq);
            assert!(reply.latency.unwrap().abs() < EPS);
        }
    }

    #[test]
    fn ten_millisecond_reply() {
        let mut tracker = RttTracker::new();
        tracker.record_send(0, 0.0);
        let reply = tracker.observe_reply(0, 0.010);
        assert_eq!(reply.class, ReplyClass::Fresh);
        let latency = reply.latency.unwrap();
        assert_eq!(format!("{:.2} ms", 1000.0 * latency), "10.00 ms");

        let summary = tracker.summary().unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.min, 0.010);
        assert_eq!(summary.max, 0.010);
        assert_eq!(summary.mean, 0.010);
    }

    #[test]
    fn second_reply_is_duplicate() {
        let mut tracker = RttTracker::new();
        tracker.record_send(0, 1.0);
        tracker.record_send(1, 2.0);

        assert_eq!(tracker.observe_reply(1, 2.5).class, ReplyClass::Fresh);
        let dup = tracker.observe_reply(1, 2.7);
        assert_eq!(dup.class, ReplyClass::Duplicate);
        assert!((dup.latency.unwrap() - 0.7).abs() < 1e-9);

        assert_eq!(tracker.samples(), 1);
        assert_eq!(tracker.duplicates(), 1);
    }

    #[test]
    fn resend_resets_slot() {
        let mut tracker = RttTracker::new();
        tracker.record_send(5, 1.0);
        tracker.observe_reply(5, 1.1);
        // Sequence 1005 reuses the slot of 5
        for seq in 6..=1005 {
            tracker.record_send(seq, 2.0);
        }
        let reply = tracker.observe_reply(1005, 2.2);
        assert_eq!(reply.class, ReplyClass::Fresh);
        assert!((reply.latency.unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn too_old_reply_is_stale() {
        let mut tracker = RttTracker::new();
        for seq in 0..1500 {
            tracker.record_send(seq, seq as f64);
        }
        // next is 1500, so 500 is exactly SLOTS behind
        let reply = tracker.observe_reply(500, 2000.0);
        assert_eq!(reply.class, ReplyClass::Stale);
        assert_eq!(reply.latency, None);
        assert_eq!(reply.sequence, 500);
        assert_eq!(tracker.observe_reply(501, 2000.0).class, ReplyClass::Fresh);
        assert_eq!(tracker.samples(), 1);
    }

    #[test]
    fn reply_for_unsent_sequence_is_stale() {
        let mut tracker = RttTracker::new();
        assert_eq!(tracker.observe_reply(0, 1.0).class, ReplyClass::Stale);
        tracker.record_send(0, 1.0);
        assert_eq!(tracker.observe_reply(1, 1.0).class, ReplyClass::Stale);
        assert_eq!(tracker.observe_reply(40000, 1.0).class, ReplyClass::Stale);
        assert_eq!(tracker.samples(), 0);
        assert_eq!(tracker.duplicates(), 0);
    }

    #[test]
    fn stale_check_spans_sequence_wrap() {
        let mut tracker = RttTracker::new();
        for seq in 65000..65600u32 {
            tracker.record_send(seq, 1.0);
        }
        // Wire sequence 65534 is the widened 65534, 66 behind
        let reply = tracker.observe_reply(65534, 1.5);
        assert_eq!(reply.class, ReplyClass::Fresh);
        assert_eq!(reply.sequence, 65534);
        // Wire sequence 10 is the widened 65546
        let reply = tracker.observe_reply(10, 1.5);
        assert_eq!(reply.class, ReplyClass::Fresh);
        assert_eq!(reply.sequence, 65546);
    }

    #[test]
    fn slots_do_not_collide_after_wrap() {
        let mut tracker = RttTracker::new();
        for seq in 65000..65600u32 {
            let time = match seq {
                65010 => 10.0,
                65546 => 20.0,
                _ => 1.0,
            };
            tracker.record_send(seq, time);
        }
        // Wire 65010 is 590 behind, still in the window
        let reply = tracker.observe_reply(65010, 21.0);
        assert_eq!(reply.class, ReplyClass::Fresh);
        assert_eq!(reply.sequence, 65010);
        assert_eq!(reply.latency, Some(11.0));
        // Wire 10 is 65546 and has its own slot
        let reply = tracker.observe_reply(10, 21.0);
        assert_eq!(reply.class, ReplyClass::Fresh);
        assert_eq!(reply.sequence, 65546);
        assert_eq!(reply.latency, Some(1.0));
        assert_eq!(tracker.duplicates(), 0);
    }

    #[test]
    fn reorder_counts_only_lower_fresh_sequences() {
        let mut tracker = RttTracker::new();
        assert!(!tracker.detect_reorder(0));
        assert!(!tracker.detect_reorder(2));
        assert!(tracker.detect_reorder(1));
        assert!(!tracker.detect_reorder(2));
        assert!(!tracker.detect_reorder(3));
        assert_eq!(tracker.reorders(), 1);
    }
}
