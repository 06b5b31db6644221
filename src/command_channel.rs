use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use crate::datagram_socket::DatagramSocket;
use crate::transfer_error::TransferError;

/// Request / response exchange for commands: one datagram out, the first datagram that comes
///  back is the response. Responses are not matched to requests, and there is no address check
///  at this level.
pub struct CommandChannel {
    socket: Arc<dyn DatagramSocket>,
    max_attempts: u32,
}

impl CommandChannel {
    pub fn new(socket: Arc<dyn DatagramSocket>, max_attempts: u32) -> CommandChannel {
        CommandChannel {
            socket,
            max_attempts,
        }
    }

    pub async fn send_command_with_response(&self, command: &str, to: SocketAddr, timeout: Duration) -> anyhow::Result<String> {
        for attempt in 1..=self.max_attempts {
            debug!("sending command {:?} to {:?} (attempt {})", command, to, attempt);
            if let Err(e) = self.socket.send_datagram(to, command.as_bytes()).await {
                warn!("error sending command {:?} to {:?}: {}", command, to, e);
                continue;
            }

            match self.socket.recv_datagram(timeout).await {
                Ok(Some((from, response))) => {
                    let response = String::from_utf8_lossy(&response).into_owned();
                    debug!("received response {:?} from {:?}", response, from);
                    return Ok(response);
                }
                Ok(None) => {
                    debug!("no response to command {:?} within {:?}", command, timeout);
                }
                Err(e) => {
                    warn!("error receiving response to command {:?}: {}", command, e);
                }
            }
        }

        Err(TransferError::CommandRetriesExhausted {
            command: command.to_string(),
            attempts: self.max_attempts,
        }.into())
    }
}
