use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use anyhow::bail;
use tokio::fs::{File, OpenOptions};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use crate::command::Command;
use crate::command_channel::CommandChannel;
use crate::config::{ClientConfig, TransferConfig};
use crate::datagram_socket::DatagramSocket;
use crate::progress::{LogProgress, ProgressListener};
use crate::receiver::{ReceiveSummary, ReliableReceiver};
use crate::sender::ReliableSender;
use crate::server::{DOWNLOAD_COMPLETE, READY, UPLOAD_COMPLETE};

/// The client side of the shell: one outstanding command or transfer at a time over a single
///  socket.
pub struct Client {
    config: Arc<ClientConfig>,
    transfer_config: Arc<TransferConfig>,
    socket: Arc<dyn DatagramSocket>,
    commands: CommandChannel,
    progress: Arc<dyn ProgressListener>,
}

impl Client {
    pub async fn connect(config: ClientConfig) -> anyhow::Result<Client> {
        config.validate()?;

        let local_addr: SocketAddr = if config.server_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        }
        else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local_addr).await?;
        info!("bound client socket to {:?}, server is {:?}", socket.local_addr()?, config.server_addr);

        Ok(Client::new(config, Arc::new(socket)))
    }

    pub fn new(config: ClientConfig, socket: Arc<dyn DatagramSocket>) -> Client {
        Client {
            transfer_config: Arc::new(config.transfer.clone()),
            commands: CommandChannel::new(socket.clone(), config.transfer.max_attempts),
            config: Arc::new(config),
            socket,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Client {
        self.progress = progress;
        self
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    /// Executes one command line, returning the text to show to the user. Responses to control
    ///  commands are passed through as they are, error texts included. `Err` means the exchange
    ///  itself failed, or a transfer was refused or did not complete.
    pub async fn execute(&self, line: &str) -> anyhow::Result<Option<String>> {
        let Some(command) = Command::parse(line) else {
            return Ok(None);
        };

        let response = match command {
            Command::Upload(None) | Command::Download(None, _) => "error: file name required".to_string(),
            Command::Unknown(_) => "error: unknown command".to_string(),
            Command::Upload(Some(name)) => self.upload(&name).await?,
            Command::Download(Some(name), local_name) => {
                let local_name = local_name.unwrap_or_else(|| name.clone());
                self.download(&name, &local_name).await?
            }
            control => self.request(&control.to_wire()).await?,
        };
        Ok(Some(response))
    }

    async fn request(&self, line: &str) -> anyhow::Result<String> {
        self.commands.send_command_with_response(line, self.server_addr(), self.transfer_config.command_timeout).await
    }

    async fn upload(&self, name: &str) -> anyhow::Result<String> {
        let path = self.config.local_dir.join(name);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => return Ok(format!("error: cannot open {}: {}", path.display(), e)),
        };
        let total_len = file.metadata().await?.len();

        let response = self.request(&Command::Upload(Some(name.to_string())).to_wire()).await?;
        if response != READY {
            bail!("server not ready: {}", response);
        }

        let sender = ReliableSender::new(self.transfer_config.clone(), self.socket.clone())
            .with_progress(self.progress.clone());
        match sender.transmit(&mut file, Some(total_len), self.server_addr()).await {
            Ok(summary) => debug!("uploaded {:?}: {:?}", path, summary),
            Err(e) => {
                self.drain_notice().await;
                return Err(e.context("upload failed"));
            }
        }

        self.await_completion(UPLOAD_COMPLETE).await?;
        Ok("file uploaded successfully".to_string())
    }

    async fn download(&self, name: &str, local_name: &str) -> anyhow::Result<String> {
        let path = self.config.local_dir.join(local_name);

        let response = self.request(&Command::Download(Some(name.to_string()), None).to_wire()).await?;
        if response != READY {
            bail!("server not ready: {}", response);
        }

        match self.receive_into(&path).await {
            Ok(summary) => debug!("downloaded {:?}: {:?}", path, summary),
            Err(e) => {
                self.drain_notice().await;
                return Err(e.context("download failed"));
            }
        }

        self.await_completion(DOWNLOAD_COMPLETE).await?;
        Ok(format!("file downloaded successfully to {}", path.display()))
    }

    async fn receive_into(&self, path: &Path) -> anyhow::Result<ReceiveSummary> {
        // the server is already sending, so a local problem can only be reported after the fact
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(path).await?;
        let receiver = ReliableReceiver::new(self.transfer_config.clone(), self.socket.clone())
            .with_progress(self.progress.clone());
        receiver.receive(&mut file, self.server_addr()).await
    }

    /// Waits for the notice that ends a transfer
    async fn await_completion(&self, expected: &str) -> anyhow::Result<()> {
        match self.next_notice().await? {
            Some(notice) if notice == expected => Ok(()),
            Some(notice) => bail!("server reported '{}' instead of '{}'", notice, expected),
            None => bail!("no '{}' notice from {:?} within {:?}", expected, self.server_addr(), self.transfer_config.completion_timeout),
        }
    }

    /// After a failed transfer, the server still sends its notice once it gives up on its end.
    ///  It must not be taken for the response to the next command.
    async fn drain_notice(&self) {
        match self.next_notice().await {
            Ok(Some(notice)) => debug!("server ended the failed transfer with '{}'", notice),
            Ok(None) => debug!("no notice from the server for the failed transfer"),
            Err(e) => warn!("error waiting for the server's notice: {}", e),
        }
    }

    /// Returns the next notice from the server, skipping what is left of the transfer (acks and
    ///  re-sent data packets). `None` if nothing arrives within the completion timeout.
    async fn next_notice(&self) -> anyhow::Result<Option<String>> {
        let deadline = Instant::now() + self.transfer_config.completion_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some((from, datagram)) = self.socket.recv_datagram(remaining).await? else {
                return Ok(None);
            };

            if is_notice(&datagram) {
                return Ok(Some(String::from_utf8_lossy(&datagram).into_owned()));
            }
            debug!("skipping transfer datagram from {:?} ({} bytes) while waiting for the server's notice", from, datagram.len());
        }
    }
}

fn is_notice(datagram: &[u8]) -> bool {
    datagram == UPLOAD_COMPLETE.as_bytes()
        || datagram == DOWNLOAD_COMPLETE.as_bytes()
        || datagram.starts_with(b"error: ")
}
