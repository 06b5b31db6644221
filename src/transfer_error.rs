use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Protocol-level failures that callers may want to tell apart. They travel inside
///  `anyhow::Error` like everything else and can be recovered with `downcast_ref`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("packet {seq} was not acknowledged after {attempts} attempts")]
    RetriesExhausted { seq: u32, attempts: u32 },

    #[error("no response to command {command:?} after {attempts} attempts")]
    CommandRetriesExhausted { command: String, attempts: u32 },

    #[error("no datagram from {peer} for {idle:?}")]
    IdleTimeout { peer: SocketAddr, idle: Duration },

    #[error("the session for {peer} was closed")]
    PeerClosed { peer: SocketAddr },
}
