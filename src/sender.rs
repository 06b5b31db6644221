use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::bail;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};
use crate::config::TransferConfig;
use crate::datagram_socket::DatagramSocket;
use crate::packet::{encode_into, Ack, DataPacket};
use crate::progress::{LogProgress, ProgressListener};
use crate::send_state::{transition, SendAction, SendEvent, SendState};
use crate::transfer_error::TransferError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SendSummary {
    /// number of acknowledged data packets, not counting the EOF packet
    pub packets: u32,
    pub bytes: u64,
    pub retransmissions: u32,
}

/// The sending half of a transfer: chunks a byte source and pushes it through a
///  [DatagramSocket] one packet at a time (stop-and-wait), finishing with the EOF sentinel.
pub struct ReliableSender {
    config: Arc<TransferConfig>,
    socket: Arc<dyn DatagramSocket>,
    progress: Arc<dyn ProgressListener>,
}

impl ReliableSender {
    pub fn new(config: Arc<TransferConfig>, socket: Arc<dyn DatagramSocket>) -> ReliableSender {
        ReliableSender {
            config,
            socket,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> ReliableSender {
        self.progress = progress;
        self
    }

    /// Transmits everything `source` yields to `to`. `total_len` is only used for progress
    ///  reporting.
    ///
    /// The EOF packet is sent exactly once and is not waited for: the receiver's ack for it
    ///  may or may not arrive, and the transfer counts as complete either way.
    pub async fn transmit<R: AsyncRead + Unpin + Send>(&self, source: &mut R, total_len: Option<u64>, to: SocketAddr) -> anyhow::Result<SendSummary> {
        debug!("starting transfer to {:?} ({:?} bytes)", to, total_len);

        let mut chunk = vec![0u8; self.config.chunk_size];
        let mut chunk_len = 0;
        let mut send_buf = BytesMut::with_capacity(DataPacket::HEADER_LEN + self.config.chunk_size);
        let mut summary = SendSummary::default();

        let mut state = SendState::INITIAL;
        let mut action = SendAction::ReadChunk;
        loop {
            let event = match action {
                SendAction::ReadChunk => {
                    chunk_len = read_chunk(source, &mut chunk).await?;
                    chunk_event(chunk_len)
                }
                SendAction::SendPacket { seq, attempt } => {
                    if attempt > 1 {
                        debug!("re-sending packet {} to {:?} (attempt {})", seq, to, attempt);
                        summary.retransmissions += 1;
                    }
                    trace!("sending packet {} ({} bytes) to {:?}", seq, chunk_len, to);
                    send_buf.clear();
                    encode_into(&mut send_buf, seq, &chunk[..chunk_len]);
                    match self.socket.send_datagram(to, &send_buf).await {
                        Ok(()) => SendEvent::Sent,
                        Err(e) => {
                            warn!("error sending packet {} to {:?}: {}", seq, to, e);
                            SendEvent::SendFailed
                        }
                    }
                }
                SendAction::AwaitAck { seq } => self.await_ack(seq, to).await?,
                SendAction::ChunkAcknowledged { seq } => {
                    summary.packets += 1;
                    summary.bytes += chunk_len as u64;
                    trace!("packet {} acknowledged by {:?}", seq, to);
                    self.progress.on_progress(summary.bytes, total_len);

                    chunk_len = read_chunk(source, &mut chunk).await?;
                    chunk_event(chunk_len)
                }
                SendAction::SendEof { seq } => {
                    debug!("sending EOF to {:?} as packet {}", to, seq);
                    send_buf.clear();
                    DataPacket::eof(seq).ser(&mut send_buf);
                    self.socket.send_datagram(to, &send_buf).await?;
                    self.progress.on_finished(summary.bytes);
                    debug!("transfer to {:?} complete: {:?}", to, summary);
                    return Ok(summary);
                }
                SendAction::Abort { seq, attempts } => {
                    warn!("giving up on transfer to {:?}: packet {} was not acknowledged after {} attempts", to, seq, attempts);
                    return Err(TransferError::RetriesExhausted { seq, attempts }.into());
                }
                SendAction::Ignore => {
                    bail!("this is a bug: sender in state {:?} has no next action", state);
                }
            };

            (state, action) = transition(state, event, self.config.max_attempts);
        }
    }

    async fn await_ack(&self, seq: u32, to: SocketAddr) -> anyhow::Result<SendEvent> {
        match self.socket.recv_datagram(self.config.ack_timeout).await? {
            None => {
                debug!("ack timeout for packet {} to {:?}", seq, to);
                Ok(SendEvent::Timeout)
            }
            Some((_, datagram)) => match Ack::deser(&datagram) {
                Ok(ack) => {
                    if ack.seq != seq {
                        debug!("expected ack for packet {}, received ack for {}", seq, ack.seq);
                    }
                    Ok(SendEvent::AckReceived(ack.seq))
                }
                Err(e) => {
                    debug!("discarding unparseable ack while waiting for packet {}: {}", seq, e);
                    Ok(SendEvent::MalformedAck)
                }
            },
        }
    }
}

fn chunk_event(chunk_len: usize) -> SendEvent {
    if chunk_len == 0 {
        SendEvent::SourceExhausted
    }
    else {
        SendEvent::ChunkReady
    }
}

/// Fills `chunk` as far as the source allows, so that only the last chunk is ever short
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, chunk: &mut [u8]) -> anyhow::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        let n = source.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram_socket::MockDatagramSocket;
    use crate::progress::MockProgressListener;
    use crate::receiver::{ReceiveSummary, ReliableReceiver};
    use crate::test_util::{data_datagram, peer_addr, test_config, Fate, SimNetwork};
    use bytes::Bytes;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use rstest::rstest;

    #[rstest]
    #[case::empty(0, 0)]
    #[case::short(10, 3)]
    #[case::exact(8192, 100)]
    #[case::split_first_chunk(20_000, 5000)]
    #[case::split_after_chunk(20_000, 9000)]
    #[tokio::test]
    async fn test_read_chunk_fills_completely(#[case] len: usize, #[case] split: usize) {
        // the chained reader returns a short read at `split`
        let data = vec![7u8; len];
        let mut source = data[..split].chain(&data[split..]);

        let mut chunk = vec![0u8; 8192];
        let n = read_chunk(&mut source, &mut chunk).await.unwrap();
        assert_eq!(n, len.min(8192));
    }

    #[tokio::test]
    async fn test_transmit_mock_socket() {
        let to = peer_addr(9);
        let mut seq = Sequence::new();
        let mut socket = MockDatagramSocket::new();

        socket.expect_send_datagram()
            .once()
            .in_sequence(&mut seq)
            .withf(move |addr, buf| addr == &to && buf == [0, 0, 0, 0, 1, 2, 3])
            .returning(|_, _| Ok(()));
        socket.expect_recv_datagram()
            .once()
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some((to, Bytes::from_static(&[0, 0, 0, 0])))));
        socket.expect_send_datagram()
            .once()
            .in_sequence(&mut seq)
            .withf(move |addr, buf| addr == &to && buf == b"\0\0\0\x01EOF")
            .returning(|_, _| Ok(()));

        let mut progress = MockProgressListener::new();
        progress.expect_on_progress()
            .once()
            .with(eq(3), eq(Some(3)))
            .return_const(());
        progress.expect_on_finished()
            .once()
            .with(eq(3))
            .return_const(());

        let sender = ReliableSender::new(Arc::new(test_config()), Arc::new(socket))
            .with_progress(Arc::new(progress));
        let summary = sender.transmit(&mut [1u8, 2, 3].as_slice(), Some(3), to).await.unwrap();
        assert_eq!(summary, SendSummary { packets: 1, bytes: 3, retransmissions: 0 });
    }

    #[tokio::test]
    async fn test_transmit_empty_source_sends_only_eof() {
        let to = peer_addr(9);
        let mut socket = MockDatagramSocket::new();
        socket.expect_send_datagram()
            .once()
            .withf(|_, buf| buf == b"\0\0\0\0EOF")
            .returning(|_, _| Ok(()));
        socket.expect_recv_datagram().never();

        let sender = ReliableSender::new(Arc::new(test_config()), Arc::new(socket));
        let summary = sender.transmit(&mut [0u8; 0].as_slice(), Some(0), to).await.unwrap();
        assert_eq!(summary, SendSummary::default());
    }

    #[tokio::test]
    async fn test_transmit_malformed_ack_is_retried() {
        let to = peer_addr(9);
        let mut socket = MockDatagramSocket::new();
        let mut seq = Sequence::new();

        socket.expect_send_datagram()
            .times(2)
            .in_sequence(&mut seq)
            .withf(|_, buf| buf == [0, 0, 0, 0, 5])
            .returning(|_, _| Ok(()));
        // first answer is too short, second one is fine - the mock returns them in order
        let mut answers = vec![Bytes::from_static(&[0, 0, 0, 0]), Bytes::from_static(&[0, 0])];
        socket.expect_recv_datagram()
            .times(2)
            .returning(move |_| Ok(Some((to, answers.pop().unwrap()))));
        socket.expect_send_datagram()
            .once()
            .in_sequence(&mut seq)
            .withf(|_, buf| buf == b"\0\0\0\x01EOF")
            .returning(|_, _| Ok(()));

        let sender = ReliableSender::new(Arc::new(test_config()), Arc::new(socket));
        let summary = sender.transmit(&mut [5u8].as_slice(), None, to).await.unwrap();
        assert_eq!(summary.retransmissions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_budget_exhaustion_fails() {
        let net = SimNetwork::new();
        let sender_socket = net.socket(peer_addr(1));
        // the peer exists but never acknowledges anything
        let _silent_peer = net.socket(peer_addr(2));

        let sender = ReliableSender::new(Arc::new(test_config()), sender_socket);
        let result = sender.transmit(&mut vec![1u8; 100].as_slice(), Some(100), peer_addr(2)).await;

        let err = result.unwrap_err();
        assert_eq!(err.downcast_ref::<TransferError>(), Some(&TransferError::RetriesExhausted { seq: 0, attempts: 5 }));

        // exactly the retry budget went out, and no EOF
        let mut expected = vec![0u8, 0, 0, 0];
        expected.extend_from_slice(&[1u8; 100]);
        let sent = net.sent_from(peer_addr(1));
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(|d| d.as_ref() == expected.as_slice()));
    }

    /// runs sender and receiver concurrently on a simulated network from peer 1 to peer 2
    async fn transfer_over(net: Arc<SimNetwork>, data: Vec<u8>) -> (anyhow::Result<SendSummary>, anyhow::Result<ReceiveSummary>, Vec<u8>) {
        let config = Arc::new(test_config());
        let sender = ReliableSender::new(config.clone(), net.socket(peer_addr(1)));
        let receiver = ReliableReceiver::new(config, net.socket(peer_addr(2)));

        let total_len = data.len() as u64;
        let mut source = data.as_slice();
        let mut sink = Vec::new();
        let (sent, received) = tokio::join!(
            sender.transmit(&mut source, Some(total_len), peer_addr(2)),
            receiver.receive(&mut sink, peer_addr(1)),
        );
        (sent, received, sink)
    }

    fn data_packets_from(net: &SimNetwork, from: SocketAddr) -> Vec<DataPacket> {
        net.sent_from(from).iter()
            .map(|d| DataPacket::deser(d).unwrap())
            .collect()
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one_byte(1)]
    #[case::one_chunk(8192)]
    #[case::one_chunk_plus_one(8193)]
    #[case::several_chunks(100_000)]
    #[tokio::test(start_paused = true)]
    async fn test_lossless_transfer_reproduces_source(#[case] len: usize) {
        let data = (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let net = SimNetwork::new();

        let (sent, received, sink) = transfer_over(net.clone(), data.clone()).await;
        let sent = sent.unwrap();
        let received = received.unwrap();

        assert_eq!(sink, data);
        assert_eq!(sent.bytes, len as u64);
        assert_eq!(sent.retransmissions, 0);
        assert_eq!(received.bytes, len as u64);
        assert_eq!(received.eof_seq, sent.packets);
    }

    #[tokio::test(start_paused = true)]
    async fn test_20000_bytes_packetization() {
        let data = vec![42u8; 20_000];
        let net = SimNetwork::new();

        let (sent, received, sink) = transfer_over(net.clone(), data).await;
        assert_eq!(sent.unwrap().packets, 3);
        assert_eq!(received.unwrap().bytes, 20_000);
        assert_eq!(sink.len(), 20_000);

        let packets = data_packets_from(&net, peer_addr(1));
        let shape = packets.iter()
            .map(|p| (p.seq, p.payload.len(), p.is_eof()))
            .collect::<Vec<_>>();
        assert_eq!(shape, vec![
            (0, 8192, false),
            (1, 8192, false),
            (2, 3616, false),
            (3, 3, true),
        ]);

        let acks = net.sent_from(peer_addr(2));
        assert_eq!(acks.iter().map(|a| a.as_ref().to_vec()).collect::<Vec<_>>(), vec![
            vec![0, 0, 0, 0],
            vec![0, 0, 0, 1],
            vec![0, 0, 0, 2],
            vec![0, 0, 0, 3],
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_dropped_ack_is_recovered() {
        // drop the first ack for packet 1
        let mut dropped = false;
        let net = SimNetwork::with_fault_model(move |d| {
            if !dropped && d.from == peer_addr(2) && d.buf.as_ref() == [0, 0, 0, 1] {
                dropped = true;
                Fate::Drop
            }
            else {
                Fate::Deliver
            }
        });

        let data = (0..20_000).map(|i| (i % 13) as u8).collect::<Vec<_>>();
        let (sent, received, sink) = transfer_over(net.clone(), data.clone()).await;
        let sent = sent.unwrap();
        let received = received.unwrap();

        assert_eq!(sink, data);
        assert_eq!(sent.retransmissions, 1);
        assert_eq!(received.stats.duplicates, 1);

        let seqs = data_packets_from(&net, peer_addr(1)).iter().map(|p| p.seq).collect::<Vec<_>>();
        assert_eq!(seqs, vec![0, 1, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_data_packet_is_recovered() {
        let mut count = 0;
        let net = SimNetwork::with_fault_model(move |d| {
            if d.from == peer_addr(1) {
                count += 1;
                // the second and third transmission of anything from the sender get lost
                if count == 2 || count == 3 {
                    return Fate::Drop;
                }
            }
            Fate::Deliver
        });

        let data = vec![9u8; 10_000];
        let (sent, received, sink) = transfer_over(net, data.clone()).await;
        assert_eq!(sink, data);
        assert_eq!(sent.unwrap().retransmissions, 2);
        assert_eq!(received.unwrap().stats.duplicates, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicated_data_packet_does_not_duplicate_data() {
        // the network delivers the first data packet twice
        let mut duplicated = false;
        let net = SimNetwork::with_fault_model(move |d| {
            if !duplicated && d.from == peer_addr(1) {
                duplicated = true;
                Fate::Duplicate
            }
            else {
                Fate::Deliver
            }
        });

        let data = (0..30_000).map(|i| (i % 7) as u8).collect::<Vec<_>>();
        let (sent, received, sink) = transfer_over(net, data.clone()).await;
        assert_eq!(sink, data);
        // the second ack for packet 0 is stale when it arrives and costs a retransmission
        assert!(sent.unwrap().retransmissions >= 1);
        assert!(received.unwrap().stats.duplicates >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_peer_is_ignored_during_transfer() {
        let net = SimNetwork::new();
        let config = Arc::new(test_config());
        let sender = ReliableSender::new(config.clone(), net.socket(peer_addr(1)));
        let receiver = ReliableReceiver::new(config, net.socket(peer_addr(2)));

        // queued before the transfer starts, so the receiver sees it first
        let intruder = net.socket(peer_addr(3));
        intruder.send_datagram(peer_addr(2), &data_datagram(0, b"garbage")).await.unwrap();

        let data = vec![1u8; 5000];
        let mut source = data.as_slice();
        let mut sink = Vec::new();
        let (sent, received) = tokio::join!(
            sender.transmit(&mut source, None, peer_addr(2)),
            receiver.receive(&mut sink, peer_addr(1)),
        );
        sent.unwrap();
        assert_eq!(sink, data);
        assert_eq!(received.unwrap().stats.foreign_peer, 1);

        // nothing was acknowledged to the intruder
        assert!(net.sent().iter().all(|d| d.to != peer_addr(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_acks_lost_fails_the_sender() {
        let net = SimNetwork::with_fault_model(|d| if d.from == peer_addr(2) { Fate::Drop } else { Fate::Deliver });

        let data = vec![1u8; 100];
        let (sent, received, sink) = transfer_over(net, data.clone()).await;

        assert!(matches!(sent.unwrap_err().downcast_ref::<TransferError>(), Some(TransferError::RetriesExhausted { seq: 0, attempts: 5 })));
        // the receiver got the data once and then idles out, keeping what it wrote
        assert!(matches!(received.unwrap_err().downcast_ref::<TransferError>(), Some(TransferError::IdleTimeout { .. })));
        assert_eq!(sink, data);
    }
}
