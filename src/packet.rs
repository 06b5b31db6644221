use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound for any datagram this crate sends or expects to receive
pub const MAX_DATAGRAM_SIZE: usize = 128 * 1024;

/// Payload that marks the end of a transfer rather than carrying data
pub const EOF_SENTINEL: &[u8] = b"EOF";

/// A data packet: the sequence number followed by the raw payload. There is no length field -
///  a datagram's boundary is the packet's boundary.
///
/// ```ascii
/// 0: sequence number (u32 BE)
/// 4: payload (0..chunk_size bytes, or the EOF sentinel)
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPacket {
    pub seq: u32,
    pub payload: Bytes,
}

impl DataPacket {
    pub const HEADER_LEN: usize = std::mem::size_of::<u32>();

    pub fn new(seq: u32, payload: impl Into<Bytes>) -> DataPacket {
        DataPacket {
            seq,
            payload: payload.into(),
        }
    }

    pub fn eof(seq: u32) -> DataPacket {
        DataPacket::new(seq, Bytes::from_static(EOF_SENTINEL))
    }

    pub fn is_eof(&self) -> bool {
        self.payload.as_ref() == EOF_SENTINEL
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        encode_into(buf, self.seq, &self.payload);
    }

    /// Fails for datagrams that are too short to hold a sequence number. Callers are expected
    ///  to drop such datagrams.
    pub fn deser(datagram: &Bytes) -> anyhow::Result<DataPacket> {
        if datagram.len() < Self::HEADER_LEN {
            bail!("malformed packet: {} bytes is too short for a sequence number", datagram.len());
        }
        let mut header = &datagram[..Self::HEADER_LEN];
        let seq = header.get_u32();
        Ok(DataPacket {
            seq,
            payload: datagram.slice(Self::HEADER_LEN..),
        })
    }
}

/// Appends a data packet to `buf`
pub fn encode_into(buf: &mut BytesMut, seq: u32, payload: &[u8]) {
    buf.reserve(DataPacket::HEADER_LEN + payload.len());
    buf.put_u32(seq);
    buf.put_slice(payload);
}

/// An acknowledgment is a bare sequence number, echoing a packet that was accepted now or
///  earlier:
///
/// ```ascii
/// 0: acknowledged sequence number (u32 BE)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    pub seq: u32,
}

impl Ack {
    pub const SERIALIZED_LEN: usize = std::mem::size_of::<u32>();

    pub fn ser(&self) -> [u8; Self::SERIALIZED_LEN] {
        self.seq.to_be_bytes()
    }

    /// Only the first four bytes are interpreted, trailing bytes are ignored
    pub fn deser(mut buf: &[u8]) -> anyhow::Result<Ack> {
        if buf.len() < Self::SERIALIZED_LEN {
            bail!("malformed ack: {} bytes", buf.len());
        }
        Ok(Ack { seq: buf.get_u32() })
    }
}
