/// Per-remote-node sequence numbers.
///
/// Each remote node stamps its own sequence number into responses. The driver
/// remembers the last one seen and sends it, incremented, as the receiver
/// sequence of its next request to that node.
use std::collections::BTreeMap;

use crate::proto::{NodeId, SeqNum, NODE_UNKNOWN, SEQNO_UNKNOWN};

/// Advance a sequence number, skipping the unknown sentinel on wrap.
pub fn next_seq(seq: SeqNum) -> SeqNum {
    match seq.wrapping_add(1) {
        SEQNO_UNKNOWN => 1,
        n => n,
    }
}

/// Serial-number comparison: is `a` newer than `b`?
pub fn is_newer(a: SeqNum, b: SeqNum) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

#[derive(Default)]
pub struct SequenceTracker {
    nodes: BTreeMap<NodeId, SeqNum>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored counter for `node`, created from `observed` on first sight.
    pub fn record_or_get(&mut self, node: NodeId, observed: SeqNum) -> &mut SeqNum {
        self.nodes.entry(node).or_insert(observed)
    }

    /// Remember the sequence number a response from `node` carried.
    pub fn observe(&mut self, node: NodeId, seq: SeqNum) {
        if node == NODE_UNKNOWN || seq == SEQNO_UNKNOWN {
            return;
        }
        let stored = self.record_or_get(node, seq);
        if is_newer(seq, *stored) {
            *stored = seq;
        }
    }

    /// Bump and return the receiver sequence for the next request to `node`.
    pub fn next_receiver_seq(&mut self, node: NodeId) -> SeqNum {
        let stored = self.record_or_get(node, SEQNO_UNKNOWN);
        *stored = next_seq(*stored);
        *stored
    }

    pub fn get(&self, node: NodeId) -> Option<SeqNum> {
        self.nodes.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
