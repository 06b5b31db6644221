use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::bail;
use crate::packet::{DataPacket, MAX_DATAGRAM_SIZE};

pub const DEFAULT_PORT: u16 = 8000;

/// Parameters of the reliable transfer protocol and the command channel. Both peers of a
///  transfer are expected to run with compatible values, but nothing is negotiated on the wire.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum payload bytes per data packet. A chunk is always filled completely before it is
    ///  sent, so only the last data packet of a transfer can be shorter.
    pub chunk_size: usize,

    /// How long the sender waits for the acknowledgment of a single transmission attempt
    pub ack_timeout: Duration,

    /// Number of attempts (not re-tries) for a data packet or a command before giving up. This
    ///  is shared between the data path and the command channel.
    pub max_attempts: u32,

    /// The receiver gives up if no datagram at all arrives for this long. This is deliberately
    ///  independent of (and much longer than) `ack_timeout`, so it covers a sender running
    ///  through its full retry budget.
    pub receive_idle_timeout: Duration,

    /// Per-attempt timeout for request / response exchanges on the command channel
    pub command_timeout: Duration,

    /// How long a client waits for the final 'upload complete' / 'download complete' notice
    pub completion_timeout: Duration,

    /// Capacity of a server-side session queue, in datagrams. Datagrams arriving at a full
    ///  queue are dropped and recovered by the sender's retransmission.
    pub session_queue_len: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            chunk_size: 8192,
            ack_timeout: Duration::from_secs(2),
            max_attempts: 5,
            receive_idle_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(5),
            completion_timeout: Duration::from_secs(30),
            session_queue_len: 64,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must not be 0");
        }
        if self.chunk_size + DataPacket::HEADER_LEN > MAX_DATAGRAM_SIZE {
            bail!("chunk size {} does not fit into a datagram of {} bytes", self.chunk_size, MAX_DATAGRAM_SIZE);
        }
        if self.max_attempts == 0 {
            bail!("at least one attempt is required");
        }
        if self.ack_timeout.is_zero() || self.receive_idle_timeout.is_zero() || self.command_timeout.is_zero() || self.completion_timeout.is_zero() {
            bail!("timeouts must be positive");
        }
        if self.session_queue_len == 0 {
            bail!("session queue length must not be 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address that the server's UDP socket is bound to
    pub self_addr: SocketAddr,
    /// The initial working directory for every peer
    pub root_dir: PathBuf,
    pub transfer: TransferConfig,
}

impl ServerConfig {
    pub fn new(self_addr: SocketAddr, root_dir: PathBuf) -> ServerConfig {
        ServerConfig {
            self_addr,
            root_dir,
            transfer: TransferConfig::default(),
        }
    }

    pub fn default_addr() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.root_dir.is_dir() {
            bail!("{:?} is not a directory", self.root_dir);
        }
        self.transfer.validate()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    /// Local files are uploaded from and downloaded to this directory
    pub local_dir: PathBuf,
    pub transfer: TransferConfig,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr, local_dir: PathBuf) -> ClientConfig {
        ClientConfig {
            server_addr,
            local_dir,
            transfer: TransferConfig::default(),
        }
    }

    pub fn default_server_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.transfer.validate()
    }
}
