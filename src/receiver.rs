use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};
use crate::config::TransferConfig;
use crate::datagram_socket::DatagramSocket;
use crate::packet::Ack;
use crate::progress::{LogProgress, ProgressListener};
use crate::receive_sequencer::{ReceiveSequencer, ReceiverStats, Verdict};
use crate::transfer_error::TransferError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub bytes: u64,
    /// sequence number of the EOF packet, i.e. the number of data packets in the transfer
    pub eof_seq: u32,
    pub stats: ReceiverStats,
}

/// The receiving half of a transfer: reads datagrams until the EOF sentinel arrives, writing
///  accepted payloads to a sink and acknowledging them.
pub struct ReliableReceiver {
    config: Arc<TransferConfig>,
    socket: Arc<dyn DatagramSocket>,
    progress: Arc<dyn ProgressListener>,
}

impl ReliableReceiver {
    pub fn new(config: Arc<TransferConfig>, socket: Arc<dyn DatagramSocket>) -> ReliableReceiver {
        ReliableReceiver {
            config,
            socket,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> ReliableReceiver {
        self.progress = progress;
        self
    }

    /// Receives a transfer from `peer` into `sink`. If no datagram arrives for the configured
    ///  idle timeout, the transfer fails. Data written up to that point stays in the sink.
    pub async fn receive<W: AsyncWrite + Unpin + Send>(&self, sink: &mut W, peer: SocketAddr) -> anyhow::Result<ReceiveSummary> {
        debug!("waiting for transfer from {:?}", peer);

        let mut sequencer = ReceiveSequencer::new(peer);
        let mut bytes = 0u64;

        loop {
            let (from, datagram) = match self.socket.recv_datagram(self.config.receive_idle_timeout).await? {
                Some(received) => received,
                None => {
                    warn!("transfer from {:?} timed out after {} bytes", peer, bytes);
                    return Err(TransferError::IdleTimeout { peer, idle: self.config.receive_idle_timeout }.into());
                }
            };

            let verdict = sequencer.on_datagram(from, &datagram);

            if let Verdict::Accept { payload, .. } = &verdict {
                if let Err(e) = sink.write_all(payload).await {
                    error!("error writing data from {:?}: {}", peer, e);
                    return Err(e.into());
                }
                bytes += payload.len() as u64;
                self.progress.on_progress(bytes, None);
            }

            if let Some(seq) = verdict.ack_seq() {
                // a lost ack is recovered by the sender's retransmission, so failing to send one
                //  is not fatal
                if let Err(e) = self.socket.send_datagram(peer, &Ack { seq }.ser()).await {
                    warn!("error sending ack {} to {:?}: {}", seq, peer, e);
                }
            }

            if let Verdict::Eof { seq } = verdict {
                sink.flush().await?;
                self.progress.on_finished(bytes);
                let summary = ReceiveSummary { bytes, eof_seq: seq, stats: sequencer.stats() };
                debug!("transfer from {:?} complete: {:?}", peer, summary);
                return Ok(summary);
            }
        }
    }
}
