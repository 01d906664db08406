//! Per-session delivery reassembler (C7).
//!
//! STT results arrive out of order (batches race each other, some
//! fail outright). This holds results until every lower sequence has
//! either been released or explicitly skipped, so the client always
//! sees strictly ascending, gap-free delivery — with one documented
//! exception: a hole that outlives the drain deadline is forced open
//! rather than stalling the turn forever.

use std::collections::HashMap;

use crate::types::DeliveryRecord;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Slot {
    Result { result: serde_json::Value, is_final: bool },
    Skipped,
}

/// Tracks one session's expected-next sequence number and whatever
/// results have arrived ahead of it.
#[derive(Debug)]
pub struct DeliveryReassembler {
    session_id: Uuid,
    expected_seq: u64,
    pending: HashMap<u64, Slot>,
}

impl DeliveryReassembler {
    pub fn new(session_id: Uuid) -> Self {
        Self { session_id, expected_seq: 0, pending: HashMap::new() }
    }

    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// A real STT result arrived for `sequence`. Returns every
    /// delivery now releasable in ascending order (possibly empty,
    /// possibly more than one if this fills a gap).
    pub fn arrive(&mut self, sequence: u64, result: serde_json::Value, is_final: bool) -> Vec<DeliveryRecord> {
        if sequence < self.expected_seq {
            // stale: already passed by a forced skip
            return Vec::new();
        }
        self.pending.insert(sequence, Slot::Result { result, is_final });
        self.drain_ready()
    }

    /// A work item was dropped before reaching the STT engine (e.g.
    /// its ring-buffer range was already truncated) and is treated as
    /// already delivered: fill the slot with nothing to deliver.
    pub fn skip(&mut self, sequence: u64) -> Vec<DeliveryRecord> {
        if sequence < self.expected_seq {
            return Vec::new();
        }
        self.pending.insert(sequence, Slot::Skipped);
        self.drain_ready()
    }

    /// TURN_END drain deadline exceeded: force `expected_seq` forward
    /// to `up_to` (exclusive), skipping any sequence still missing a
    /// result. Returns whatever newly-contiguous deliveries this
    /// unblocks.
    pub fn force_advance_to(&mut self, up_to: u64) -> Vec<DeliveryRecord> {
        let mut skipped = 0u64;
        while self.expected_seq < up_to {
            if !self.pending.contains_key(&self.expected_seq) {
                skipped += 1;
            }
            self.pending.remove(&self.expected_seq);
            self.expected_seq += 1;
        }
        let _ = skipped;
        self.drain_ready()
    }

    /// How many sequences would be force-skipped by
    /// `force_advance_to(up_to)`, for stats reporting by the caller.
    pub fn count_holes_before(&self, up_to: u64) -> u64 {
        (self.expected_seq..up_to)
            .filter(|seq| !self.pending.contains_key(seq))
            .count() as u64
    }

    fn drain_ready(&mut self) -> Vec<DeliveryRecord> {
        let mut out = Vec::new();
        while let Some(slot) = self.pending.remove(&self.expected_seq) {
            if let Slot::Result { result, is_final } = slot {
                out.push(DeliveryRecord {
                    session_id: self.session_id,
                    sequence: self.expected_seq,
                    result,
                    is_final,
                });
            }
            self.expected_seq += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_order_arrivals_release_immediately() {
        let mut r = DeliveryReassembler::new(Uuid::nil());
        let d0 = r.arrive(0, json!({"text": "a"}), false);
        assert_eq!(d0.len(), 1);
        assert_eq!(d0[0].sequence, 0);
        let d1 = r.arrive(1, json!({"text": "b"}), true);
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].sequence, 1);
        assert_eq!(r.expected_seq(), 2);
    }

    #[test]
    fn out_of_order_arrival_holds_until_gap_fills() {
        let mut r = DeliveryReassembler::new(Uuid::nil());
        let d1 = r.arrive(1, json!({"text": "b"}), false);
        assert!(d1.is_empty(), "seq 1 held back, seq 0 still missing");
        assert!(r.has_pending());

        let d0 = r.arrive(0, json!({"text": "a"}), false);
        assert_eq!(d0.len(), 2);
        assert_eq!(d0[0].sequence, 0);
        assert_eq!(d0[1].sequence, 1);
        assert!(!r.has_pending());
    }

    #[test]
    fn skip_fills_a_slot_without_emitting_a_delivery() {
        let mut r = DeliveryReassembler::new(Uuid::nil());
        let d = r.skip(0);
        assert!(d.is_empty());
        assert_eq!(r.expected_seq(), 1);

        let d1 = r.arrive(1, json!({"text": "b"}), true);
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].sequence, 1);
    }

    #[test]
    fn force_advance_skips_unresolved_holes_and_releases_trailing_results() {
        let mut r = DeliveryReassembler::new(Uuid::nil());
        // seq 2 arrived early; 0 and 1 never will.
        r.arrive(2, json!({"text": "c"}), false);
        assert_eq!(r.count_holes_before(3), 2);

        let out = r.force_advance_to(3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sequence, 2);
        assert_eq!(r.expected_seq(), 3);
        assert!(!r.has_pending());
    }

    #[test]
    fn stale_arrival_after_force_advance_is_dropped() {
        let mut r = DeliveryReassembler::new(Uuid::nil());
        r.force_advance_to(5);
        let out = r.arrive(2, json!({"text": "late"}), false);
        assert!(out.is_empty());
    }
}
