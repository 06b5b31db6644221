use std::net::SocketAddr;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use crate::packet::DataPacket;

/// Counters for every datagram the receiving side looked at. Drops are silent on the wire, so
///  this is the place to observe them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// in-sequence data packets that were passed on to the sink
    pub accepted: u64,
    /// packets with a sequence number that was accepted before - acknowledged again
    pub duplicates: u64,
    /// packets ahead of the expected sequence number - dropped without ack
    pub gaps: u64,
    /// datagrams from some address other than the transfer's peer
    pub foreign_peer: u64,
    /// datagrams too short to hold a sequence number
    pub malformed: u64,
}

/// What to do with a single datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Write the payload to the sink, then acknowledge
    Accept { seq: u32, payload: Bytes },
    /// Acknowledge again, do not write
    Duplicate { seq: u32 },
    /// Acknowledge and finish the transfer
    Eof { seq: u32 },
    Gap { seq: u32 },
    ForeignPeer,
    Malformed,
}

impl Verdict {
    /// the sequence number to acknowledge, if any
    pub fn ack_seq(&self) -> Option<u32> {
        match self {
            Verdict::Accept { seq, .. } | Verdict::Duplicate { seq } | Verdict::Eof { seq } => Some(*seq),
            Verdict::Gap { .. } | Verdict::ForeignPeer | Verdict::Malformed => None,
        }
    }
}

/// Enforces sequence and address discipline for one transfer: only the exact next expected
///  packet is accepted, and nothing later is buffered. Recovery from gaps is left to the sender's
///  timeout-driven retransmission.
pub struct ReceiveSequencer {
    peer: SocketAddr,
    expected_seq: u32,
    stats: ReceiverStats,
}

impl ReceiveSequencer {
    pub fn new(peer: SocketAddr) -> ReceiveSequencer {
        ReceiveSequencer {
            peer,
            expected_seq: 0,
            stats: ReceiverStats::default(),
        }
    }

    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn on_datagram(&mut self, from: SocketAddr, datagram: &Bytes) -> Verdict {
        if from != self.peer {
            warn!("dropping datagram from {:?} during a transfer with {:?}", from, self.peer);
            self.stats.foreign_peer += 1;
            return Verdict::ForeignPeer;
        }

        let packet = match DataPacket::deser(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping datagram from {:?}: {}", from, e);
                self.stats.malformed += 1;
                return Verdict::Malformed;
            }
        };

        // NB: the sentinel is checked before the sequence number, so EOF ends the transfer
        //  regardless of its position
        if packet.is_eof() {
            debug!("received EOF from {:?} as packet {}", from, packet.seq);
            return Verdict::Eof { seq: packet.seq };
        }

        if packet.seq == self.expected_seq {
            trace!("received packet {} ({} bytes) from {:?}", packet.seq, packet.payload.len(), from);
            self.expected_seq = self.expected_seq.wrapping_add(1);
            self.stats.accepted += 1;
            Verdict::Accept { seq: packet.seq, payload: packet.payload }
        }
        else if packet.seq < self.expected_seq {
            debug!("received duplicate of packet {} from {:?} - acknowledging again", packet.seq, from);
            self.stats.duplicates += 1;
            Verdict::Duplicate { seq: packet.seq }
        }
        else {
            debug!("received packet {} from {:?}, expected {} - dropping", packet.seq, from, self.expected_seq);
            self.stats.gaps += 1;
            Verdict::Gap { seq: packet.seq }
        }
    }
}
