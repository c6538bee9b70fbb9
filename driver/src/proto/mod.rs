/// Scatter/gather wire protocol.
///
/// Requests and responses share one fixed-layout packet. The presence of a
/// block payload is signalled by the data flag and by the packet length.
pub mod packet;

pub use packet::{
    decode, encode, encode_into, packet_size, BlockData, BlockId, Decoded, NodeId, PacketFields,
    PacketHeader, SeqNum, SystemOp, BASE_PACKET_SIZE, BLOCK_SIZE, BLOCK_UNKNOWN,
    DATA_PACKET_SIZE, MAGIC, NODE_UNKNOWN, SEQNO_INITIAL, SEQNO_UNKNOWN,
};
