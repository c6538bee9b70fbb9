/// Scatter/gather packet types and wire format.
///
/// Every packet is a fixed-offset record:
///   magic[4] local[8] remote[8] block[8] op[4] sseq[2] rseq[2] flag[1]
/// followed by either magic[4] (base packet) or data[1024] magic[4]
/// (data packet). All integers are little-endian.
use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::error::PacketError;

pub type NodeId = u64;
pub type BlockId = u64;
pub type SeqNum = u16;

pub const NODE_UNKNOWN: NodeId = 0;
pub const BLOCK_UNKNOWN: BlockId = 0;
pub const SEQNO_UNKNOWN: SeqNum = 0;
pub const SEQNO_INITIAL: SeqNum = 1;

/// Bytes in one remotely addressable block.
pub const BLOCK_SIZE: usize = 1024;

/// One block image.
pub type BlockData = [u8; BLOCK_SIZE];

pub const MAGIC: u32 = 0xfefe;

const OFF_MAGIC: usize = 0;
const OFF_LOCAL: usize = 4;
const OFF_REMOTE: usize = 12;
const OFF_BLOCK: usize = 20;
const OFF_OP: usize = 28;
const OFF_SSEQ: usize = 32;
const OFF_RSEQ: usize = 34;
const OFF_FLAG: usize = 36;
const OFF_BODY: usize = 37;

pub const BASE_PACKET_SIZE: usize = OFF_BODY + 4;
pub const DATA_PACKET_SIZE: usize = OFF_BODY + BLOCK_SIZE + 4;

const_assert_eq!(BASE_PACKET_SIZE, 41);
const_assert_eq!(DATA_PACKET_SIZE, 1065);

/// Operation codes carried in the `op` field.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemOp {
    InitEndpoint = 0,
    CreateBlock = 1,
    UpdateBlock = 2,
    ObtainBlock = 3,
    /// Reserved; the driver never issues it.
    DeleteBlock = 4,
    StopEndpoint = 5,
    /// Reserved upper bound of the valid range.
    MaxVal = 6,
}

impl SystemOp {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::InitEndpoint),
            1 => Some(Self::CreateBlock),
            2 => Some(Self::UpdateBlock),
            3 => Some(Self::ObtainBlock),
            4 => Some(Self::DeleteBlock),
            5 => Some(Self::StopEndpoint),
            6 => Some(Self::MaxVal),
            _ => None,
        }
    }

    /// Fields this operation is allowed to carry as the "unknown" sentinel.
    ///
    /// Bootstrap and teardown exchanges happen before (or without) a
    /// concrete block, and creates ask the remote side to pick the node and
    /// block. The sender sequence is never exempt.
    pub fn may_be_unknown(self) -> PacketFields {
        match self {
            Self::InitEndpoint => {
                PacketFields::LOCAL_ID
                    | PacketFields::REMOTE_ID
                    | PacketFields::BLOCK_ID
                    | PacketFields::RECEIVER_SEQ
            }
            Self::CreateBlock | Self::StopEndpoint => {
                PacketFields::REMOTE_ID | PacketFields::BLOCK_ID | PacketFields::RECEIVER_SEQ
            }
            Self::UpdateBlock | Self::ObtainBlock | Self::DeleteBlock | Self::MaxVal => {
                PacketFields::empty()
            }
        }
    }
}

bitflags! {
    /// Header fields that are subject to sentinel validation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFields: u8 {
        const LOCAL_ID     = 1 << 0;
        const REMOTE_ID    = 1 << 1;
        const BLOCK_ID     = 1 << 2;
        const SENDER_SEQ   = 1 << 3;
        const RECEIVER_SEQ = 1 << 4;
    }
}

/// Header fields of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub local_id: NodeId,
    pub remote_id: NodeId,
    pub block_id: BlockId,
    pub op: SystemOp,
    pub sender_seq: SeqNum,
    pub receiver_seq: SeqNum,
}

/// Result of decoding a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub header: PacketHeader,
    /// True when the packet was data sized and its block was copied out.
    pub has_data: bool,
}

/// Size of the packet `encode` produces for the given payload presence.
pub const fn packet_size(has_data: bool) -> usize {
    if has_data {
        DATA_PACKET_SIZE
    } else {
        BASE_PACKET_SIZE
    }
}

// ---- Validation ----

fn check(exempt: PacketFields, field: PacketFields, value: u64, err: PacketError) -> Result<(), PacketError> {
    if value == 0 && !exempt.contains(field) {
        Err(err)
    } else {
        Ok(())
    }
}

fn validate_header(h: &PacketHeader) -> Result<(), PacketError> {
    let exempt = h.op.may_be_unknown();
    check(exempt, PacketFields::LOCAL_ID, h.local_id, PacketError::LocalIdBad)?;
    check(exempt, PacketFields::REMOTE_ID, h.remote_id, PacketError::RemoteIdBad)?;
    check(exempt, PacketFields::SENDER_SEQ, h.sender_seq.into(), PacketError::SenderSeqBad)?;
    check(exempt, PacketFields::RECEIVER_SEQ, h.receiver_seq.into(), PacketError::ReceiverSeqBad)?;
    check(exempt, PacketFields::BLOCK_ID, h.block_id, PacketError::BlockIdBad)?;
    Ok(())
}

// ---- Wire format ----

/// Serialize a packet, returning the encoded bytes.
pub fn encode(header: &PacketHeader, data: Option<&BlockData>) -> Result<Vec<u8>, PacketError> {
    let mut buf = vec![0u8; packet_size(data.is_some())];
    encode_into(header, data, &mut buf)?;
    Ok(buf)
}

/// Serialize a packet into `out`. Returns the packet length.
pub fn encode_into(
    header: &PacketHeader,
    data: Option<&BlockData>,
    out: &mut [u8],
) -> Result<usize, PacketError> {
    validate_header(header)?;

    let len = packet_size(data.is_some());
    if out.len() < len {
        return Err(PacketError::BufferBad);
    }

    out[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&MAGIC.to_le_bytes());
    out[OFF_LOCAL..OFF_LOCAL + 8].copy_from_slice(&header.local_id.to_le_bytes());
    out[OFF_REMOTE..OFF_REMOTE + 8].copy_from_slice(&header.remote_id.to_le_bytes());
    out[OFF_BLOCK..OFF_BLOCK + 8].copy_from_slice(&header.block_id.to_le_bytes());
    out[OFF_OP..OFF_OP + 4].copy_from_slice(&(header.op as u32).to_le_bytes());
    out[OFF_SSEQ..OFF_SSEQ + 2].copy_from_slice(&header.sender_seq.to_le_bytes());
    out[OFF_RSEQ..OFF_RSEQ + 2].copy_from_slice(&header.receiver_seq.to_le_bytes());

    match data {
        Some(block) => {
            out[OFF_FLAG] = 1;
            out[OFF_BODY..OFF_BODY + BLOCK_SIZE].copy_from_slice(block);
            out[OFF_BODY + BLOCK_SIZE..len].copy_from_slice(&MAGIC.to_le_bytes());
        }
        None => {
            out[OFF_FLAG] = 0;
            out[OFF_BODY..len].copy_from_slice(&MAGIC.to_le_bytes());
        }
    }

    Ok(len)
}

/// Parse a packet.
///
/// A packet exactly `BASE_PACKET_SIZE` long yields only the header. Any other
/// length is treated as a data packet and requires `data`; the embedded block
/// is copied into it. Magic values are not checked.
pub fn decode(packet: &[u8], data: Option<&mut BlockData>) -> Result<Decoded, PacketError> {
    if packet.len() < BASE_PACKET_SIZE {
        return Err(PacketError::Truncated {
            len: packet.len(),
            need: BASE_PACKET_SIZE,
        });
    }

    let local_id = read_u64(packet, OFF_LOCAL);
    let remote_id = read_u64(packet, OFF_REMOTE);
    let block_id = read_u64(packet, OFF_BLOCK);
    let raw_op = read_u32(packet, OFF_OP);
    let sender_seq = read_u16(packet, OFF_SSEQ);
    let receiver_seq = read_u16(packet, OFF_RSEQ);

    let op = SystemOp::from_u32(raw_op);
    let exempt = op.map_or(PacketFields::empty(), SystemOp::may_be_unknown);

    check(exempt, PacketFields::LOCAL_ID, local_id, PacketError::LocalIdBad)?;
    check(exempt, PacketFields::REMOTE_ID, remote_id, PacketError::RemoteIdBad)?;
    check(exempt, PacketFields::BLOCK_ID, block_id, PacketError::BlockIdBad)?;
    let op = op.ok_or(PacketError::OperationBad(raw_op))?;
    check(exempt, PacketFields::SENDER_SEQ, sender_seq.into(), PacketError::SenderSeqBad)?;
    check(exempt, PacketFields::RECEIVER_SEQ, receiver_seq.into(), PacketError::ReceiverSeqBad)?;

    let header = PacketHeader {
        local_id,
        remote_id,
        block_id,
        op,
        sender_seq,
        receiver_seq,
    };

    if packet.len() == BASE_PACKET_SIZE {
        return Ok(Decoded { header, has_data: false });
    }

    let dst = data.ok_or(PacketError::BlockDataBad)?;
    if packet.len() < DATA_PACKET_SIZE {
        return Err(PacketError::Truncated {
            len: packet.len(),
            need: DATA_PACKET_SIZE,
        });
    }
    dst.copy_from_slice(&packet[OFF_BODY..OFF_BODY + BLOCK_SIZE]);

    Ok(Decoded { header, has_data: true })
}

// ---- Helpers ----

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obtain_header() -> PacketHeader {
        PacketHeader {
            local_id: 7,
            remote_id: 9,
            block_id: 42,
            op: SystemOp::ObtainBlock,
            sender_seq: 3,
            receiver_seq: 5,
        }
    }

    #[test]
    fn base_packet_round_trip() {
        let h = obtain_header();
        let bytes = encode(&h, None).unwrap();
        assert_eq!(bytes.len(), BASE_PACKET_SIZE);
        assert_eq!(bytes[OFF_FLAG], 0);

        let decoded = decode(&bytes, None).unwrap();
        assert_eq!(decoded.header, h);
        assert!(!decoded.has_data);
    }

    #[test]
    fn data_packet_round_trip() {
        let h = PacketHeader { op: SystemOp::UpdateBlock, ..obtain_header() };
        let mut block = [0u8; BLOCK_SIZE];
        for (i, b) in block.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }

        let bytes = encode(&h, Some(&block)).unwrap();
        assert_eq!(bytes.len(), DATA_PACKET_SIZE);
        assert_eq!(bytes[OFF_FLAG], 1);

        let mut out = [0u8; BLOCK_SIZE];
        let decoded = decode(&bytes, Some(&mut out)).unwrap();
        assert_eq!(decoded.header, h);
        assert!(decoded.has_data);
        assert_eq!(out, block);
    }

    #[test]
    fn wire_layout_offsets() {
        let bytes = encode(&obtain_header(), None).unwrap();
        assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
        assert_eq!(read_u64(&bytes, 4), 7);
        assert_eq!(read_u64(&bytes, 12), 9);
        assert_eq!(read_u64(&bytes, 20), 42);
        assert_eq!(read_u32(&bytes, 28), SystemOp::ObtainBlock as u32);
        assert_eq!(read_u16(&bytes, 32), 3);
        assert_eq!(read_u16(&bytes, 34), 5);
        assert_eq!(&bytes[37..41], &MAGIC.to_le_bytes());

        let block = [0xAAu8; BLOCK_SIZE];
        let bytes = encode(&obtain_header(), Some(&block)).unwrap();
        assert_eq!(&bytes[1061..1065], &MAGIC.to_le_bytes());
    }

    #[test]
    fn encode_rejects_each_sentinel() {
        let cases = [
            (PacketHeader { local_id: 0, ..obtain_header() }, PacketError::LocalIdBad),
            (PacketHeader { remote_id: 0, ..obtain_header() }, PacketError::RemoteIdBad),
            (PacketHeader { sender_seq: 0, ..obtain_header() }, PacketError::SenderSeqBad),
            (PacketHeader { receiver_seq: 0, ..obtain_header() }, PacketError::ReceiverSeqBad),
            (PacketHeader { block_id: 0, ..obtain_header() }, PacketError::BlockIdBad),
        ];
        for (h, want) in cases {
            assert_eq!(encode(&h, None).unwrap_err(), want);
        }
    }

    #[test]
    fn encode_checks_fields_in_order() {
        let h = PacketHeader {
            local_id: 0,
            remote_id: 0,
            block_id: 0,
            ..obtain_header()
        };
        assert_eq!(encode(&h, None).unwrap_err(), PacketError::LocalIdBad);
    }

    #[test]
    fn bootstrap_ops_accept_unknowns() {
        let init = PacketHeader {
            local_id: NODE_UNKNOWN,
            remote_id: NODE_UNKNOWN,
            block_id: BLOCK_UNKNOWN,
            op: SystemOp::InitEndpoint,
            sender_seq: SEQNO_INITIAL,
            receiver_seq: SEQNO_UNKNOWN,
        };
        assert!(encode(&init, None).is_ok());

        // Sender sequence is never exempt.
        let bad = PacketHeader { sender_seq: SEQNO_UNKNOWN, ..init };
        assert_eq!(encode(&bad, None).unwrap_err(), PacketError::SenderSeqBad);

        // Create needs a local id.
        let create = PacketHeader { op: SystemOp::CreateBlock, ..init };
        assert_eq!(encode(&create, None).unwrap_err(), PacketError::LocalIdBad);
        let create = PacketHeader { local_id: 3, ..create };
        assert!(encode(&create, Some(&[0u8; BLOCK_SIZE])).is_ok());

        let stop = PacketHeader { op: SystemOp::StopEndpoint, local_id: 3, ..init };
        assert!(encode(&stop, None).is_ok());
    }

    #[test]
    fn decode_rejects_out_of_range_op() {
        let mut bytes = encode(&obtain_header(), None).unwrap();
        bytes[OFF_OP..OFF_OP + 4].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(decode(&bytes, None).unwrap_err(), PacketError::OperationBad(7));

        // Reserved codes are still inside the valid range.
        bytes[OFF_OP..OFF_OP + 4].copy_from_slice(&6u32.to_le_bytes());
        assert_eq!(decode(&bytes, None).unwrap().header.op, SystemOp::MaxVal);
    }

    #[test]
    fn decode_rejects_zero_fields() {
        let mut bytes = encode(&obtain_header(), None).unwrap();
        bytes[OFF_BLOCK..OFF_BLOCK + 8].fill(0);
        assert_eq!(decode(&bytes, None).unwrap_err(), PacketError::BlockIdBad);

        let mut bytes = encode(&obtain_header(), None).unwrap();
        bytes[OFF_RSEQ..OFF_RSEQ + 2].fill(0);
        assert_eq!(decode(&bytes, None).unwrap_err(), PacketError::ReceiverSeqBad);
    }

    #[test]
    fn decode_data_packet_needs_buffer() {
        let bytes = encode(&obtain_header(), Some(&[1u8; BLOCK_SIZE])).unwrap();
        assert_eq!(decode(&bytes, None).unwrap_err(), PacketError::BlockDataBad);
    }

    #[test]
    fn decode_short_input() {
        let bytes = encode(&obtain_header(), None).unwrap();
        assert!(matches!(
            decode(&bytes[..20], None),
            Err(PacketError::Truncated { len: 20, .. })
        ));

        let mut out = [0u8; BLOCK_SIZE];
        let data = encode(&obtain_header(), Some(&[1u8; BLOCK_SIZE])).unwrap();
        assert!(matches!(
            decode(&data[..100], Some(&mut out)),
            Err(PacketError::Truncated { .. })
        ));

        // Block present but trailing magic cut off.
        assert_eq!(
            decode(&data[..DATA_PACKET_SIZE - 4], Some(&mut out)),
            Err(PacketError::Truncated {
                len: DATA_PACKET_SIZE - 4,
                need: DATA_PACKET_SIZE,
            })
        );
        assert!(decode(&data, Some(&mut out)).is_ok());
    }

    #[test]
    fn encode_into_small_buffer() {
        let mut out = [0u8; BASE_PACKET_SIZE];
        assert_eq!(encode_into(&obtain_header(), None, &mut out), Ok(BASE_PACKET_SIZE));
        assert_eq!(
            encode_into(&obtain_header(), Some(&[0u8; BLOCK_SIZE]), &mut out),
            Err(PacketError::BufferBad)
        );
    }
}
