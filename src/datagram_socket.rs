use std::net::SocketAddr;
use std::time::Duration;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::trace;
use crate::packet::MAX_DATAGRAM_SIZE;

/// This is an abstraction for exchanging single datagrams, introduced so that the protocol
///  logic runs unchanged on a plain UDP socket (client), on a per-peer session queue (server)
///  and on simulated lossy links (tests).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// Waits for the next datagram, returning `None` if nothing arrived within `timeout`.
    async fn recv_datagram(&self, timeout: Duration) -> anyhow::Result<Option<(SocketAddr, Bytes)>>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        self.send_to(buf, to).await?;
        Ok(())
    }

    async fn recv_datagram(&self, timeout: Duration) -> anyhow::Result<Option<(SocketAddr, Bytes)>> {
        let mut buf = BytesMut::with_capacity(MAX_DATAGRAM_SIZE);
        match time::timeout(timeout, self.recv_buf_from(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(result) => {
                let (len, from) = result?;
                trace!("UDP socket: received {} bytes from {:?}", len, from);
                Ok(Some((from, buf.freeze())))
            }
        }
    }
}
