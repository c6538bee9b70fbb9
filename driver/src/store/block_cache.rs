/// Fixed-capacity block cache.
///
/// Recency is a logical clock: every admission and every lookup hit takes the
/// next clock value. When the cache is full, the line with the smallest
/// timestamp is overwritten. Lines are located through a hash index; the
/// eviction victim is found by scanning all lines.
use std::collections::HashMap;

use log::{debug, info};

use crate::error::{DriverError, Result};
use crate::proto::{BlockData, BlockId, NodeId};

struct CacheLine {
    timestamp: u64,
    node: NodeId,
    block: BlockId,
    data: BlockData,
}

/// Cumulative lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
}

impl CacheStats {
    /// Hit rate as a percentage; 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / self.lookups as f64 * 100.0
    }
}

pub struct BlockCache {
    lines: Vec<CacheLine>,
    index: HashMap<(NodeId, BlockId), usize>,
    capacity: usize,
    clock: u64,
    stats: CacheStats,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DriverError::InvalidConfig(String::from(
                "cache capacity must be at least 1",
            )));
        }
        Ok(Self {
            lines: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            capacity,
            clock: 1,
            stats: CacheStats::default(),
        })
    }

    fn tick(&mut self) -> u64 {
        let t = self.clock;
        self.clock += 1;
        t
    }

    /// Look up a block, marking it most recently used on a hit.
    pub fn lookup(&mut self, node: NodeId, block: BlockId) -> Option<&BlockData> {
        self.stats.lookups += 1;

        if node == 0 && block == 0 {
            debug!("cache: lookup with unknown node and block");
            return None;
        }

        let Some(&slot) = self.index.get(&(node, block)) else {
            debug!(
                "cache: miss node={} block={} ({} of {} lines used)",
                node,
                block,
                self.lines.len(),
                self.capacity
            );
            return None;
        };

        let t = self.tick();
        self.stats.hits += 1;
        let line = &mut self.lines[slot];
        line.timestamp = t;
        debug!("cache: hit node={} block={} slot={}", node, block, slot);
        Some(&line.data)
    }

    /// Store a block image, evicting the least recently used line if full.
    ///
    /// Overwriting an existing line keeps its timestamp.
    pub fn insert_or_update(&mut self, node: NodeId, block: BlockId, data: &BlockData) {
        if let Some(&slot) = self.index.get(&(node, block)) {
            debug!("cache: updating node={} block={}", node, block);
            self.lines[slot].data.copy_from_slice(data);
            return;
        }

        let timestamp = self.tick();

        if self.lines.len() < self.capacity {
            self.index.insert((node, block), self.lines.len());
            self.lines.push(CacheLine {
                timestamp,
                node,
                block,
                data: *data,
            });
            debug!(
                "cache: inserted node={} block={} ({} of {} lines used)",
                node,
                block,
                self.lines.len(),
                self.capacity
            );
            return;
        }

        let mut victim = 0;
        for (i, line) in self.lines.iter().enumerate() {
            if line.timestamp < self.lines[victim].timestamp {
                victim = i;
            }
        }

        let line = &mut self.lines[victim];
        debug!(
            "cache: evicting node={} block={} for node={} block={}",
            line.node, line.block, node, block
        );
        self.index.remove(&(line.node, line.block));
        line.timestamp = timestamp;
        line.node = node;
        line.block = block;
        line.data.copy_from_slice(data);
        self.index.insert((node, block), victim);
    }

    /// Whether a line for the block exists. Does not touch recency or stats.
    pub fn contains(&self, node: NodeId, block: BlockId) -> bool {
        self.index.contains_key(&(node, block))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Timestamp of a block's line, for eviction-order checks.
    #[cfg(test)]
    pub(crate) fn timestamp_of(&self, node: NodeId, block: BlockId) -> Option<u64> {
        self.index.get(&(node, block)).map(|&slot| self.lines[slot].timestamp)
    }

    /// Release all lines and report the final counters.
    pub fn teardown(self) -> CacheStats {
        let stats = self.stats;
        info!(
            "[cache] total queries: {}, hit count: {}, hit rate: {:.2}%",
            stats.lookups,
            stats.hits,
            stats.hit_rate()
        );
        stats
    }
}
