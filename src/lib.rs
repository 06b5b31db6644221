//! A remote shell over UDP. A client sends single-datagram commands to a server, which answers
//!  each with a single datagram. File uploads and downloads go through a reliable stop-and-wait
//!  transfer protocol on the same socket.
//!
//! ## Commands
//!
//! A command is one datagram of UTF-8 text: the case-insensitive command name followed by
//!  whitespace-separated arguments (`echo hello`, `cd sub`, `upload file.txt`). The response is
//!  one datagram of text. Neither carries an id, so the client has at most one command in flight
//!  and re-sends it if no response arrives in time.
//!
//! A transfer starts with an `upload` or `download` command that the server answers with
//!  `ready`. Then the data flows, and the server finishes with `upload complete` /
//!  `download complete` (or `error: upload failed` / `error: download failed`).
//!
//! ## Data packets
//!
//! All numbers in network byte order (BE):
//! ```ascii
//! 0: sequence number (u32), starting at 0 for every transfer
//! 4: payload: up to 8192 bytes of file data, or the three ASCII bytes "EOF" marking the end
//! ```
//!
//! There is no length field: the datagram boundary is the framing.
//!
//! ## Acknowledgments
//!
//! ```ascii
//! 0: sequence number (u32) of the accepted (or previously accepted) packet
//! ```
//!
//! The sender has a single packet in flight. It re-sends it until the matching ack arrives, up
//!  to a fixed number of attempts, and gives up on the whole transfer after that. The EOF packet
//!  is sent once and not waited for.
//!
//! The receiver only accepts the packet it expects next. Older packets are acknowledged again
//!  without writing their data, later packets are dropped without an ack, and so are datagrams
//!  from anyone but the transfer's peer.
//!
//! ## Server sessions
//!
//! The server reads its socket in a single loop. While a peer has a transfer running, that
//!  peer's datagrams are routed to the transfer task, everything else is handled as a command.
//!  So other peers are served while a transfer is running, and a transfer never consumes
//!  another peer's datagrams.

pub mod client;
pub mod command;
pub mod command_channel;
pub mod config;
pub mod datagram_socket;
pub mod packet;
pub mod progress;
pub mod receive_sequencer;
pub mod receiver;
pub mod send_state;
pub mod sender;
pub mod server;
pub mod session;
pub mod shell;
pub mod transfer_error;

#[cfg(test)] pub mod test_util;
