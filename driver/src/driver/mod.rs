/// Driver context.
///
/// `Driver` owns every piece of client state: the transport, the block
/// cache, the per-node sequence tracker, the file table, and the local
/// endpoint identity. The byte-level read and write paths live in `io`.
use log::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, PacketError, Result};
use crate::proto::{
    self, BlockData, BlockId, Decoded, NodeId, PacketHeader, SeqNum, SystemOp, BLOCK_UNKNOWN,
    DATA_PACKET_SIZE, NODE_UNKNOWN, SEQNO_INITIAL, SEQNO_UNKNOWN,
};
use crate::store::{
    next_seq, BlockCache, BlockRef, CacheStats, FileEntry, FileHandle, FileTable, SequenceTracker,
};
use crate::transport::Transport;

mod io;
pub mod span;


/// Client for a scatter/gather block service.
///
/// Files are byte streams to the caller and lists of blocks spread over
/// remote nodes on the wire. All packets go through `T`.
pub struct Driver<T: Transport> {
    transport: T,
    config: DriverConfig,
    /// Assigned by `InitEndpoint`; `None` until then.
    local_node: Option<NodeId>,
    /// Sender sequence stamped into the next request.
    local_seq: SeqNum,
    cache: BlockCache,
    remote_seqs: SequenceTracker,
    files: FileTable,
    /// Response scratch buffer, sized for the largest packet.
    response: Vec<u8>,
}

impl<T: Transport> Driver<T> {
    pub fn new(transport: T, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let cache = BlockCache::new(config.cache_capacity as usize)?;
        Ok(Self {
            transport,
            config,
            local_node: None,
            local_seq: SEQNO_INITIAL,
            cache,
            remote_seqs: SequenceTracker::new(),
            files: FileTable::new(),
            response: vec![0u8; DATA_PACKET_SIZE],
        })
    }

    /// Establish the local endpoint and learn our node id.
    pub fn init_endpoint(&mut self) -> Result<NodeId> {
        let header =
            self.request(SystemOp::InitEndpoint, NODE_UNKNOWN, BLOCK_UNKNOWN, SEQNO_UNKNOWN);
        let resp = self.exchange(&header, None, None)?;

        let local = resp.header.local_id;
        if local == NODE_UNKNOWN {
            error!("endpoint init returned unknown local node id");
            return Err(DriverError::BadLocalId);
        }
        self.local_node = Some(local);
        info!("endpoint initialized: local node {}", local);
        Ok(local)
    }

    /// Open `path`, creating an empty file on first use.
    ///
    /// The first open initializes the endpoint.
    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        if self.local_node.is_none() {
            self.init_endpoint()?;
        }
        let fh = self.files.open(path);
        debug!("open {:?} -> {:?}", path, fh);
        Ok(fh)
    }

    /// Handle of an existing file, open or closed, without opening it.
    pub fn lookup(&self, path: &str) -> Option<FileHandle> {
        self.files.lookup(path).map(|(fh, _)| fh)
    }

    pub fn close(&mut self, fh: FileHandle) -> Result<()> {
        let entry = self.entry_mut(fh)?;
        if !entry.is_open() {
            warn!("close of {:?} which is not open", fh);
            return Err(DriverError::NotOpen(fh));
        }
        entry.set_open(false);
        debug!("close {:?}", fh);
        Ok(())
    }

    /// Move the cursor to `offset`, which may equal the file length.
    pub fn seek(&mut self, fh: FileHandle, offset: u64) -> Result<u64> {
        let entry = self.entry_mut(fh)?;
        if offset > entry.length {
            warn!("seek of {:?} to {} beyond length {}", fh, offset, entry.length);
            return Err(DriverError::SeekOutOfRange {
                offset,
                length: entry.length,
            });
        }
        entry.position = offset;
        Ok(offset)
    }

    /// Stop the endpoint and release all state.
    pub fn shutdown(mut self) -> Result<CacheStats> {
        if self.local_node.is_some() {
            let header =
                self.request(SystemOp::StopEndpoint, NODE_UNKNOWN, BLOCK_UNKNOWN, SEQNO_UNKNOWN);
            self.exchange(&header, None, None)?;
            info!("endpoint {:?} stopped", self.local_node);
        }
        Ok(self.cache.teardown())
    }

    pub fn local_node(&self) -> Option<NodeId> {
        self.local_node
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn file_length(&self, fh: FileHandle) -> Result<u64> {
        Ok(self.entry(fh)?.length)
    }

    pub fn position(&self, fh: FileHandle) -> Result<u64> {
        Ok(self.entry(fh)?.position)
    }

    pub fn block_count(&self, fh: FileHandle) -> Result<usize> {
        Ok(self.entry(fh)?.block_count())
    }

    /// Remote location of every block of the file, in file order.
    pub fn blocks(&self, fh: FileHandle) -> Result<&[BlockRef]> {
        Ok(&self.entry(fh)?.blocks)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ---- helpers ----

    fn entry(&self, fh: FileHandle) -> Result<&FileEntry> {
        self.files.get(fh).ok_or_else(|| {
            warn!("bad file handle {:?}", fh);
            DriverError::BadHandle(fh)
        })
    }

    fn entry_mut(&mut self, fh: FileHandle) -> Result<&mut FileEntry> {
        self.files.get_mut(fh).ok_or_else(|| {
            warn!("bad file handle {:?}", fh);
            DriverError::BadHandle(fh)
        })
    }

    fn open_entry(&self, fh: FileHandle) -> Result<&FileEntry> {
        let entry = self.entry(fh)?;
        if !entry.is_open() {
            warn!("{:?} is not open", fh);
            return Err(DriverError::NotOpen(fh));
        }
        Ok(entry)
    }

    fn request(
        &self,
        op: SystemOp,
        remote_id: NodeId,
        block_id: BlockId,
        receiver_seq: SeqNum,
    ) -> PacketHeader {
        PacketHeader {
            local_id: self.local_node.unwrap_or(NODE_UNKNOWN),
            remote_id,
            block_id,
            op,
            sender_seq: self.local_seq,
            receiver_seq,
        }
    }

    /// Encode, post, and decode one request/response pair.
    ///
    /// The sender sequence is consumed once the request is encoded, and
    /// receiver sequences are committed when stamped, whether or not the
    /// exchange succeeds. A retried step therefore never reuses either, even
    /// when the remote side acted on a request whose reply was lost.
    fn exchange(
        &mut self,
        header: &PacketHeader,
        data: Option<&BlockData>,
        out: Option<&mut BlockData>,
    ) -> Result<Decoded> {
        let request = proto::encode(header, data).inspect_err(|e| {
            error!("cannot encode {:?} request: {}", header.op, e);
        })?;
        self.local_seq = next_seq(self.local_seq);

        debug!(
            "post {:?} node={} block={} seq={}/{}",
            header.op, header.remote_id, header.block_id, header.sender_seq, header.receiver_seq
        );
        let len = self
            .transport
            .post(&request, &mut self.response, self.config.post_timeout)
            .inspect_err(|e| error!("{:?} exchange failed: {}", header.op, e))?;

        let bytes = self.response.get(..len).ok_or(PacketError::BufferBad)?;
        let resp = proto::decode(bytes, out).inspect_err(|e| {
            error!("cannot decode {:?} response: {}", header.op, e);
        })?;
        Ok(resp)
    }
}
