use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time;
use tracing::{debug, info, warn};
use crate::command::Command;
use crate::datagram_socket::DatagramSocket;
use crate::transfer_error::TransferError;

struct SessionEntry {
    id: u64,
    queue: mpsc::Sender<Bytes>,
    /// the command line that started the transfer, as received
    opening_command: Bytes,
    /// set once the first transfer datagram was queued
    started: bool,
}

/// What the server should do with a datagram after the session table had a look at it
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// The peer has no active transfer, the datagram is a command
    NoSession(Bytes),
    /// Handed to the peer's transfer
    Queued,
    Dropped,
    /// The command that opened the session arrived again before any transfer datagram, i.e.
    ///  the response to it got lost and must be sent again
    RepeatedOpening,
    /// The peer sent a different command line while its transfer was active, so it gave up on
    ///  the transfer. The session is closed, and the datagram is a command.
    Abandoned(Bytes),
}

/// The server's table of active transfers, keyed by the peer's address. While a peer has an
///  entry, its transfer datagrams go to the transfer's queue instead of being interpreted as
///  commands.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<FxHashMap<SocketAddr, SessionEntry>>,
    next_id: AtomicU64,
}

impl SessionTable {
    /// Registers a transfer session for `peer`, returning the channel the transfer task talks
    ///  through. Fails if the peer already has an active transfer.
    pub async fn open(&self, socket: Arc<dyn DatagramSocket>, peer: SocketAddr, opening_command: Bytes, queue_len: usize) -> anyhow::Result<SessionChannel> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&peer) {
            anyhow::bail!("{:?} already has an active transfer", peer);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (send, recv) = mpsc::channel(queue_len);
        sessions.insert(peer, SessionEntry {
            id,
            queue: send,
            opening_command,
            started: false,
        });
        debug!("opened transfer session #{} for {:?}", id, peer);

        Ok(SessionChannel {
            socket,
            peer,
            id,
            inbound: Mutex::new(recv),
        })
    }

    /// Closes the peer's session if it is still the one with `id` - the peer may have abandoned
    ///  it and started a new one in the meantime
    pub async fn close(&self, peer: SocketAddr, id: u64) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&peer).map(|s| s.id) == Some(id) {
            sessions.remove(&peer);
            debug!("closed transfer session #{} for {:?}", id, peer);
        }
    }

    pub async fn is_active(&self, peer: SocketAddr) -> bool {
        self.sessions.read().await.contains_key(&peer)
    }

    pub async fn route(&self, peer: SocketAddr, datagram: Bytes) -> Route {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&peer) else {
            return Route::NoSession(datagram);
        };

        if datagram == session.opening_command {
            if session.started {
                debug!("ignoring late duplicate of {:?}'s opening command", peer);
                return Route::Dropped;
            }
            return Route::RepeatedOpening;
        }

        // data packets and acks start with a big-endian sequence number, so their first byte is
        //  0 for any transfer below 2^24 packets and they never parse as text
        if Command::parse_datagram(&datagram).is_some() {
            info!("{:?} sent a command during its transfer - closing transfer session #{}", peer, session.id);
            sessions.remove(&peer);
            return Route::Abandoned(datagram);
        }

        session.started = true;
        if let Err(e) = session.queue.try_send(datagram) {
            // a full queue means the transfer task is lagging - the sender's retry recovers
            warn!("dropping datagram for transfer session with {:?}: {}", peer, e);
            return Route::Dropped;
        }
        Route::Queued
    }
}

/// A transfer's view of the shared server socket: sends go straight out, receives come from
///  the session's own queue, so only datagrams from the session's peer are ever seen.
pub struct SessionChannel {
    socket: Arc<dyn DatagramSocket>,
    peer: SocketAddr,
    id: u64,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
}

impl SessionChannel {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl DatagramSocket for SessionChannel {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        self.socket.send_datagram(to, buf).await
    }

    async fn recv_datagram(&self, timeout: Duration) -> anyhow::Result<Option<(SocketAddr, Bytes)>> {
        let mut inbound = self.inbound.lock().await;
        match time::timeout(timeout, inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(datagram)) => Ok(Some((self.peer, datagram))),
            Ok(None) => Err(TransferError::PeerClosed { peer: self.peer }.into()),
        }
    }
}
