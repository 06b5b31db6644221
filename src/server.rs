use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};
use crate::command::Command;
use crate::config::{ServerConfig, TransferConfig};
use crate::datagram_socket::DatagramSocket;
use crate::receiver::ReliableReceiver;
use crate::sender::ReliableSender;
use crate::session::{Route, SessionChannel, SessionTable};
use crate::shell::{ShellState, GOODBYE};
use crate::transfer_error::TransferError;

pub const READY: &str = "ready";
pub const UPLOAD_COMPLETE: &str = "upload complete";
pub const DOWNLOAD_COMPLETE: &str = "download complete";

/// The server owns the socket's receive side in a single loop. Datagrams from peers with an
///  active transfer are routed to that transfer's session, everything else is a command that is
///  answered right away. Transfers run as separate tasks.
pub struct Server {
    config: Arc<ServerConfig>,
    transfer_config: Arc<TransferConfig>,
    socket: Arc<dyn DatagramSocket>,
    sessions: Arc<SessionTable>,
    shells: FxHashMap<SocketAddr, ShellState>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> anyhow::Result<(Server, SocketAddr)> {
        config.validate()?;

        let socket = UdpSocket::bind(config.self_addr).await?;
        let local_addr = socket.local_addr()?;
        info!("bound server socket to {:?}, serving {:?}", local_addr, config.root_dir);

        Ok((Server::new(config, Arc::new(socket)), local_addr))
    }

    pub fn new(config: ServerConfig, socket: Arc<dyn DatagramSocket>) -> Server {
        Server {
            transfer_config: Arc::new(config.transfer.clone()),
            config: Arc::new(config),
            socket,
            sessions: Default::default(),
            shells: FxHashMap::default(),
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match self.socket.recv_datagram(Duration::from_secs(60)).await {
                Ok(Some((from, datagram))) => {
                    self.on_datagram(from, datagram).await;
                }
                Ok(None) => {
                    trace!("server idle");
                }
                Err(e) => {
                    error!("error receiving datagram: {}", e);
                }
            }
        }
    }

    async fn on_datagram(&mut self, from: SocketAddr, datagram: Bytes) {
        let datagram = match self.sessions.route(from, datagram).await {
            Route::NoSession(datagram) | Route::Abandoned(datagram) => datagram,
            Route::RepeatedOpening => {
                debug!("{:?} repeated the command that started its transfer - sending '{}' again", from, READY);
                self.reply(from, READY).await;
                return;
            }
            Route::Queued | Route::Dropped => return,
        };

        let Some(command) = Command::parse_datagram(&datagram) else {
            debug!("ignoring datagram from {:?} that is not a command ({} bytes)", from, datagram.len());
            return;
        };
        info!("[{}] command: {:?}", from, command);

        if let Some(response) = self.on_command(from, command, datagram).await {
            self.reply(from, &response).await;
        }
    }

    /// Returns the response for control commands. Transfer commands send their own responses
    ///  because the 'ready' must go out before the transfer task starts sending.
    async fn on_command(&mut self, from: SocketAddr, command: Command, line: Bytes) -> Option<String> {
        // only peers that changed their working directory have an entry
        let mut shell = self.shells.get(&from)
            .cloned()
            .unwrap_or_else(|| ShellState::new(self.config.root_dir.clone()));

        match command {
            Command::Echo(text) => Some(shell.echo(&text)),
            Command::Time => Some(shell.time()),
            Command::Ls => Some(shell.ls().await),
            Command::Cd(path) => {
                let response = shell.cd(path.as_deref()).await;
                if shell.cwd() == self.config.root_dir.as_path() {
                    self.shells.remove(&from);
                }
                else {
                    self.shells.insert(from, shell);
                }
                Some(response)
            }
            Command::Quit => {
                self.shells.remove(&from);
                Some(GOODBYE.to_string())
            }
            Command::Upload(name) => {
                let path = name.map(|name| shell.resolve(&name));
                self.start_upload(from, path, line).await
            }
            Command::Download(name, _) => {
                let path = name.map(|name| shell.resolve(&name));
                self.start_download(from, path, line).await
            }
            Command::Unknown(_) => Some("error: unknown command".to_string()),
        }
    }

    async fn reply(&self, to: SocketAddr, response: &str) {
        if let Err(e) = self.socket.send_datagram(to, response.as_bytes()).await {
            error!("error sending response to {:?}: {}", to, e);
        }
    }

    async fn open_session(&self, peer: SocketAddr, opening_command: Bytes) -> Result<SessionChannel, String> {
        self.sessions.open(self.socket.clone(), peer, opening_command, self.transfer_config.session_queue_len).await
            .map_err(|e| format!("error: {}", e))
    }

    /// The peer uploads, i.e. this server receives into a new file
    async fn start_upload(&self, peer: SocketAddr, path: Option<PathBuf>, line: Bytes) -> Option<String> {
        let Some(path) = path else {
            return Some("error: filename required".to_string());
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Some("error: file exists".to_string()),
            Err(e) => {
                warn!("cannot create {:?} for upload from {:?}: {}", path, peer, e);
                return Some(format!("error: cannot create file: {}", e));
            }
        };

        let channel = match self.open_session(peer, line).await {
            Ok(channel) => channel,
            Err(msg) => return Some(msg),
        };

        self.reply(peer, READY).await;

        let session_id = channel.id();
        let receiver = ReliableReceiver::new(self.transfer_config.clone(), Arc::new(channel));
        let sessions = self.sessions.clone();
        let socket = self.socket.clone();
        tokio::spawn(async move {
            let result = receiver.receive(&mut file, peer).await;
            sessions.close(peer, session_id).await;
            let notice = match result {
                Ok(summary) => {
                    info!("received {:?} from {:?}: {} bytes", path, peer, summary.bytes);
                    UPLOAD_COMPLETE
                }
                Err(e) => {
                    warn!("upload of {:?} from {:?} failed: {}", path, peer, e);
                    if let Err(e) = file.flush().await {
                        error!("error flushing partial upload {:?}: {}", path, e);
                    }
                    if is_abandoned(&e) {
                        return;
                    }
                    "error: upload failed"
                }
            };
            if let Err(e) = socket.send_datagram(peer, notice.as_bytes()).await {
                error!("error sending upload result to {:?}: {}", peer, e);
            }
        });
        None
    }

    /// The peer downloads, i.e. this server sends an existing file
    async fn start_download(&self, peer: SocketAddr, path: Option<PathBuf>, line: Bytes) -> Option<String> {
        let Some(path) = path else {
            return Some("error: filename required".to_string());
        };

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Some("error: file not found".to_string()),
            Err(e) => {
                warn!("cannot open {:?} for download by {:?}: {}", path, peer, e);
                return Some(format!("error: cannot open file: {}", e));
            }
        };
        let total_len = match file.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            Ok(_) => return Some("error: not a regular file".to_string()),
            Err(e) => return Some(format!("error: cannot open file: {}", e)),
        };

        let channel = match self.open_session(peer, line).await {
            Ok(channel) => channel,
            Err(msg) => return Some(msg),
        };

        self.reply(peer, READY).await;

        let session_id = channel.id();
        let sender = ReliableSender::new(self.transfer_config.clone(), Arc::new(channel));
        let sessions = self.sessions.clone();
        let socket = self.socket.clone();
        tokio::spawn(async move {
            let result = sender.transmit(&mut file, Some(total_len), peer).await;
            sessions.close(peer, session_id).await;
            let notice = match result {
                Ok(summary) => {
                    info!("sent {:?} to {:?}: {} bytes", path, peer, summary.bytes);
                    DOWNLOAD_COMPLETE
                }
                Err(e) => {
                    warn!("download of {:?} by {:?} failed: {}", path, peer, e);
                    if is_abandoned(&e) {
                        return;
                    }
                    "error: download failed"
                }
            };
            if let Err(e) = socket.send_datagram(peer, notice.as_bytes()).await {
                error!("error sending download result to {:?}: {}", peer, e);
            }
        });
        None
    }
}

/// The peer moved on to other commands, so it does not wait for a notice any more
fn is_abandoned(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<TransferError>(), Some(TransferError::PeerClosed { .. }))
}
