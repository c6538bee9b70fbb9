/// Error types for the scatter/gather driver.
///
/// Three layers, innermost first:
///   PacketError:    a wire packet field failed validation
///   TransportError: the request/response exchange itself failed
///   DriverError:    what file-level callers see, wrapping the other two
use thiserror::Error;

use crate::store::FileHandle;

/// Packet codec failure, one variant per offending field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet buffer missing or too small")]
    BufferBad,
    #[error("bad local node id")]
    LocalIdBad,
    #[error("bad remote node id")]
    RemoteIdBad,
    #[error("bad block id")]
    BlockIdBad,
    #[error("bad operation code {0}")]
    OperationBad(u32),
    #[error("bad sender sequence number")]
    SenderSeqBad,
    #[error("bad receiver sequence number")]
    ReceiverSeqBad,
    #[error("data packet received without a block buffer")]
    BlockDataBad,
    #[error("packet truncated: {len} bytes, need {need}")]
    Truncated { len: usize, need: usize },
}

/// Failure of the transport exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(core::time::Duration),
    #[error("transport disconnected")]
    Disconnected,
    #[error("request rejected by remote: {0}")]
    Rejected(String),
}

/// Error returned by every driver operation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("bad file handle {0:?}")]
    BadHandle(FileHandle),

    #[error("file handle {0:?} is not open")]
    NotOpen(FileHandle),

    #[error("file position {position} out of range (length {length})")]
    PositionOutOfRange { position: u64, length: u64 },

    #[error("seek offset {offset} beyond file length {length}")]
    SeekOutOfRange { offset: u64, length: u64 },

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("remote assigned unusable identity node={node} block={block}")]
    BadAssignment { node: u64, block: u64 },

    #[error("endpoint initialization returned no local node id")]
    BadLocalId,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = core::result::Result<T, DriverError>;
