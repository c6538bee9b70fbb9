/// In-memory simulated block service.
///
/// Plays the remote side of the protocol entirely in RAM: it assigns the local
/// endpoint id, spreads new blocks round-robin across a fixed set of remote
/// nodes, and checks both sequence numbers on every request. Used by the
/// tests and as the back end behind `ThreadedTransport`.
use core::time::Duration;
use std::collections::BTreeMap;

use log::{debug, warn};

use super::Transport;
use crate::error::TransportError;
use crate::proto::{
    self, BlockData, BlockId, NodeId, PacketHeader, SeqNum, SystemOp, BLOCK_SIZE, BLOCK_UNKNOWN,
    DATA_PACKET_SIZE, NODE_UNKNOWN, SEQNO_UNKNOWN,
};
use crate::store::{is_newer, next_seq};

/// First local node id handed out by endpoint initialization.
const LOCAL_ID_BASE: NodeId = 0x1000;

/// Per-operation request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub posts: u64,
    pub inits: u64,
    pub creates: u64,
    pub obtains: u64,
    pub updates: u64,
    pub stops: u64,
}

struct SimNode {
    id: NodeId,
    seq: SeqNum,
    next_block: BlockId,
    blocks: BTreeMap<BlockId, BlockData>,
}

/// RAM-backed block service.
pub struct SimService {
    nodes: Vec<SimNode>,
    placement: usize,
    next_local: NodeId,
    endpoint: Option<NodeId>,
    last_sender_seq: Option<SeqNum>,
    stats: SimStats,
    fail_after: Option<u64>,
    latency: Option<Duration>,
}

impl SimService {
    /// Create a service with `remote_nodes` nodes, ids `1..=remote_nodes`.
    pub fn new(remote_nodes: usize) -> Self {
        let nodes = (1..=remote_nodes.max(1) as NodeId)
            .map(|id| SimNode {
                id,
                // Each node starts at a different point so that tests notice
                // sequence numbers crossing between nodes.
                seq: (id as SeqNum).wrapping_mul(100),
                next_block: 1,
                blocks: BTreeMap::new(),
            })
            .collect();
        Self {
            nodes,
            placement: 0,
            next_local: LOCAL_ID_BASE,
            endpoint: None,
            last_sender_seq: None,
            stats: SimStats::default(),
            fail_after: None,
            latency: None,
        }
    }

    /// Fail every post after `posts` more have succeeded.
    pub fn fail_after(&mut self, posts: u64) {
        self.fail_after = Some(self.stats.posts + posts);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&mut self) {
        self.fail_after = None;
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = Some(latency);
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Local node id of the current endpoint, if one is established.
    pub fn endpoint(&self) -> Option<NodeId> {
        self.endpoint
    }

    /// Stored contents of a block (for test verification).
    pub fn block(&self, node: NodeId, block: BlockId) -> Option<&BlockData> {
        self.node(node).and_then(|n| n.blocks.get(&block))
    }

    /// Total number of blocks stored across all nodes.
    pub fn block_count(&self) -> usize {
        self.nodes.iter().map(|n| n.blocks.len()).sum()
    }

    /// Current sequence number of a remote node.
    pub fn node_seq(&self, node: NodeId) -> Option<SeqNum> {
        self.node(node).map(|n| n.seq)
    }

    fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SimNode, TransportError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| reject(format!("unknown remote node {}", id)))
    }

    fn check_sender_seq(&mut self, seq: SeqNum) -> Result<(), TransportError> {
        if let Some(last) = self.last_sender_seq {
            if !is_newer(seq, last) {
                return Err(reject(format!(
                    "sender sequence {} replays or precedes {}",
                    seq, last
                )));
            }
        }
        self.last_sender_seq = Some(seq);
        Ok(())
    }

    fn check_endpoint(&self, local: NodeId) -> Result<(), TransportError> {
        match self.endpoint {
            Some(id) if id == local => Ok(()),
            Some(id) => Err(reject(format!("local id {} is not endpoint {}", local, id))),
            None => Err(reject(String::from("endpoint not initialized"))),
        }
    }

    /// Process one request and write the response packet.
    fn dispatch(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, TransportError> {
        let mut payload = [0u8; BLOCK_SIZE];
        let req = proto::decode(request, Some(&mut payload))
            .map_err(|e| reject(format!("bad request: {}", e)))?;
        let h = req.header;

        self.check_sender_seq(h.sender_seq)?;

        let reply = |remote_id, block_id, receiver_seq| PacketHeader {
            local_id: h.local_id,
            remote_id,
            block_id,
            op: h.op,
            sender_seq: h.sender_seq,
            receiver_seq,
        };

        let (header, data) = match h.op {
            SystemOp::InitEndpoint => {
                self.stats.inits += 1;
                let local = self.next_local;
                self.next_local += 1;
                self.endpoint = Some(local);
                let header = PacketHeader {
                    local_id: local,
                    ..reply(NODE_UNKNOWN, BLOCK_UNKNOWN, SEQNO_UNKNOWN)
                };
                (header, None)
            }
            SystemOp::CreateBlock => {
                self.check_endpoint(h.local_id)?;
                if !req.has_data {
                    return Err(reject(String::from("create without block data")));
                }
                self.stats.creates += 1;
                let idx = self.placement % self.nodes.len();
                self.placement += 1;
                let node = &mut self.nodes[idx];
                let block = node.next_block;
                node.next_block += 1;
                node.seq = next_seq(node.seq);
                node.blocks.insert(block, payload);
                (reply(node.id, block, node.seq), None)
            }
            SystemOp::ObtainBlock | SystemOp::UpdateBlock => {
                self.check_endpoint(h.local_id)?;
                let update = h.op == SystemOp::UpdateBlock;
                if update && !req.has_data {
                    return Err(reject(String::from("update without block data")));
                }
                if update {
                    self.stats.updates += 1;
                } else {
                    self.stats.obtains += 1;
                }

                // Any sequence ahead of the node's is accepted; gaps come from
                // requests or replies lost in transit.
                let node = self.node_mut(h.remote_id)?;
                if !is_newer(h.receiver_seq, node.seq) {
                    return Err(reject(format!(
                        "node {} at receiver sequence {} refuses {}",
                        node.id, node.seq, h.receiver_seq
                    )));
                }
                let stored = node
                    .blocks
                    .get_mut(&h.block_id)
                    .ok_or_else(|| reject(format!("unknown block {}", h.block_id)))?;
                node.seq = h.receiver_seq;

                if update {
                    stored.copy_from_slice(&payload);
                    (reply(node.id, h.block_id, node.seq), None)
                } else {
                    let data = *stored;
                    (reply(node.id, h.block_id, node.seq), Some(data))
                }
            }
            SystemOp::StopEndpoint => {
                self.check_endpoint(h.local_id)?;
                self.stats.stops += 1;
                self.endpoint = None;
                (reply(NODE_UNKNOWN, BLOCK_UNKNOWN, SEQNO_UNKNOWN), None)
            }
            SystemOp::DeleteBlock | SystemOp::MaxVal => {
                return Err(reject(format!("unsupported operation {:?}", h.op)));
            }
        };

        debug!("sim: {:?} -> node={} block={}", h.op, header.remote_id, header.block_id);
        proto::encode_into(&header, data.as_ref(), response)
            .map_err(|e| reject(format!("cannot encode response: {}", e)))
    }
}

fn reject(msg: String) -> TransportError {
    warn!("sim: rejecting request: {}", msg);
    TransportError::Rejected(msg)
}

impl Transport for SimService {
    fn post(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        _timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if let Some(limit) = self.fail_after {
            if self.stats.posts >= limit {
                return Err(TransportError::Disconnected);
            }
        }
        self.stats.posts += 1;

        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }

        debug_assert!(response.len() >= DATA_PACKET_SIZE);
        self.dispatch(request, response)
    }
}
