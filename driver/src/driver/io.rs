/// File mapping engine.
///
/// Translates byte-range reads and writes on a file into block-level
/// obtain, create, and update exchanges. File metadata (block list, length,
/// cursor) only changes after the remote side has acknowledged the step
/// that justifies it.
use log::{debug, error, warn};

use super::span::{BlockSpan, BlockSpans};
use super::Driver;
use crate::error::{DriverError, PacketError, Result};
use crate::proto::{BlockData, SystemOp, BLOCK_SIZE, BLOCK_UNKNOWN, NODE_UNKNOWN, SEQNO_UNKNOWN};
use crate::store::{BlockRef, FileHandle};
use crate::transport::Transport;

impl<T: Transport> Driver<T> {
    /// Read up to `buf.len()` bytes at the cursor.
    ///
    /// The request is clamped to the end of the file. Reading with the cursor
    /// at or past the end is an error rather than a zero-length read.
    pub fn read(&mut self, fh: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let entry = self.open_entry(fh)?;
        if entry.position >= entry.length {
            warn!("read of {:?} at {} past length {}", fh, entry.position, entry.length);
            return Err(DriverError::PositionOutOfRange {
                position: entry.position,
                length: entry.length,
            });
        }

        let start = entry.position;
        let len = (buf.len() as u64).min(entry.remaining()) as usize;
        let spans = entry_spans(&entry.blocks, start, len)?;

        let mut copied = 0;
        for (span, at) in spans {
            let data = self.fetch_block(at)?;
            buf[copied..copied + span.len].copy_from_slice(&data[span.range()]);
            copied += span.len;
        }

        self.entry_mut(fh)?.position = start + copied as u64;
        debug!("read {:?}: {} bytes at {}", fh, copied, start);
        Ok(copied)
    }

    /// Write `buf` at the cursor, extending the file as needed.
    pub fn write(&mut self, fh: FileHandle, buf: &[u8]) -> Result<usize> {
        let start = self.open_entry(fh)?.position;

        let mut written = 0;
        for span in BlockSpans::new(start, buf.len()) {
            let chunk = &buf[written..written + span.len];
            let existing = self.entry(fh)?.blocks.get(span.index).copied();

            match existing {
                Some(at) => self.overwrite_span(at, &span, chunk)?,
                None => {
                    let mut image = [0u8; BLOCK_SIZE];
                    image[span.range()].copy_from_slice(chunk);
                    let at = self.create_block(&image)?;
                    self.entry_mut(fh)?.blocks.push(at);
                }
            }

            written += span.len;
            let entry = self.entry_mut(fh)?;
            entry.position = start + written as u64;
            entry.length = entry.length.max(entry.position);
            debug_assert!(entry.length <= entry.allocated_bytes());
        }

        debug!("write {:?}: {} bytes at {}", fh, written, start);
        Ok(written)
    }

    /// Merge `chunk` into an existing block and push it back.
    fn overwrite_span(&mut self, at: BlockRef, span: &BlockSpan, chunk: &[u8]) -> Result<()> {
        let mut image = if span.is_full() {
            [0u8; BLOCK_SIZE]
        } else {
            self.fetch_block(at)?
        };
        image[span.range()].copy_from_slice(chunk);
        self.update_block(at, &image)
    }

    /// Cached image of a block, obtaining it from its node on a miss.
    fn fetch_block(&mut self, at: BlockRef) -> Result<BlockData> {
        if let Some(data) = self.cache.lookup(at.node, at.block) {
            debug!("cache hit node={} block={}", at.node, at.block);
            return Ok(*data);
        }
        debug!("cache miss node={} block={}", at.node, at.block);

        let data = self.obtain_block(at)?;
        self.cache.insert_or_update(at.node, at.block, &data);
        Ok(data)
    }

    fn obtain_block(&mut self, at: BlockRef) -> Result<BlockData> {
        let rseq = self.remote_seqs.next_receiver_seq(at.node);
        let header = self.request(SystemOp::ObtainBlock, at.node, at.block, rseq);

        let mut data = [0u8; BLOCK_SIZE];
        let resp = self.exchange(&header, None, Some(&mut data))?;
        if !resp.has_data {
            error!("obtain of node={} block={} returned no data", at.node, at.block);
            return Err(PacketError::BlockDataBad.into());
        }

        self.remote_seqs.observe(at.node, resp.header.receiver_seq);
        Ok(data)
    }

    fn create_block(&mut self, data: &BlockData) -> Result<BlockRef> {
        let header =
            self.request(SystemOp::CreateBlock, NODE_UNKNOWN, BLOCK_UNKNOWN, SEQNO_UNKNOWN);
        let resp = self.exchange(&header, Some(data), None)?;

        let at = BlockRef {
            node: resp.header.remote_id,
            block: resp.header.block_id,
        };
        if at.node == NODE_UNKNOWN || at.block == BLOCK_UNKNOWN {
            error!("create assigned node={} block={}", at.node, at.block);
            return Err(DriverError::BadAssignment {
                node: at.node,
                block: at.block,
            });
        }

        self.remote_seqs.observe(at.node, resp.header.receiver_seq);
        self.cache.insert_or_update(at.node, at.block, data);
        debug!("created node={} block={}", at.node, at.block);
        Ok(at)
    }

    fn update_block(&mut self, at: BlockRef, data: &BlockData) -> Result<()> {
        let rseq = self.remote_seqs.next_receiver_seq(at.node);
        let header = self.request(SystemOp::UpdateBlock, at.node, at.block, rseq);
        let resp = self.exchange(&header, Some(data), None)?;

        let (node, block) = (resp.header.remote_id, resp.header.block_id);
        if node != at.node || block != at.block {
            error!(
                "update of node={} block={} acknowledged as node={} block={}",
                at.node, at.block, node, block
            );
            return Err(DriverError::BadAssignment { node, block });
        }

        self.remote_seqs.observe(at.node, resp.header.receiver_seq);
        if self.cache.contains(at.node, at.block) {
            self.cache.insert_or_update(at.node, at.block, data);
        }
        Ok(())
    }
}

/// Pair each span of `[start, start + len)` with the block that holds it.
fn entry_spans(blocks: &[BlockRef], start: u64, len: usize) -> Result<Vec<(BlockSpan, BlockRef)>> {
    BlockSpans::new(start, len)
        .map(|span| {
            blocks
                .get(span.index)
                .map(|&at| (span, at))
                .ok_or(DriverError::PositionOutOfRange {
                    position: (span.index * BLOCK_SIZE) as u64,
                    length: (blocks.len() * BLOCK_SIZE) as u64,
                })
        })
        .collect()
}
