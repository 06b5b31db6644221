use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::time;
use crate::config::TransferConfig;
use crate::datagram_socket::DatagramSocket;
use crate::packet::DataPacket;

pub fn peer_addr(number: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], number))
}

pub fn test_config() -> TransferConfig {
    TransferConfig::default()
}

pub fn data_datagram(seq: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    DataPacket::new(seq, Bytes::copy_from_slice(payload)).ser(&mut buf);
    buf.freeze()
}

/// What the simulated network does with a datagram
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    Duplicate,
}

/// One datagram as it was handed to the simulated network
#[derive(Clone, Debug)]
pub struct SentDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub buf: Bytes,
}

type FaultModel = Box<dyn FnMut(&SentDatagram) -> Fate + Send>;

/// An in-memory datagram network for deterministic tests: every socket has an inbound queue,
///  every send is logged, and a fault model decides per datagram whether it is delivered,
///  dropped or duplicated. Datagrams to unknown addresses vanish, like on a real network.
pub struct SimNetwork {
    inbound: Mutex<FxHashMap<SocketAddr, mpsc::UnboundedSender<(SocketAddr, Bytes)>>>,
    sent: Mutex<Vec<SentDatagram>>,
    fault_model: Mutex<FaultModel>,
}

impl SimNetwork {
    pub fn new() -> Arc<SimNetwork> {
        Self::with_fault_model(|_| Fate::Deliver)
    }

    pub fn with_fault_model(fault_model: impl FnMut(&SentDatagram) -> Fate + Send + 'static) -> Arc<SimNetwork> {
        Arc::new(SimNetwork {
            inbound: Default::default(),
            sent: Default::default(),
            fault_model: Mutex::new(Box::new(fault_model)),
        })
    }

    pub fn socket(self: &Arc<Self>, addr: SocketAddr) -> Arc<SimSocket> {
        let (send, recv) = mpsc::unbounded_channel();
        self.inbound.lock().unwrap().insert(addr, send);
        Arc::new(SimSocket {
            addr,
            network: self.clone(),
            inbound: tokio::sync::Mutex::new(recv),
        })
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_from(&self, from: SocketAddr) -> Vec<Bytes> {
        self.sent.lock().unwrap().iter()
            .filter(|d| d.from == from)
            .map(|d| d.buf.clone())
            .collect()
    }

    fn transmit(&self, datagram: SentDatagram) {
        let fate = (self.fault_model.lock().unwrap())(&datagram);
        self.sent.lock().unwrap().push(datagram.clone());

        let copies = match fate {
            Fate::Deliver => 1,
            Fate::Drop => 0,
            Fate::Duplicate => 2,
        };
        if let Some(queue) = self.inbound.lock().unwrap().get(&datagram.to) {
            for _ in 0..copies {
                let _ = queue.send((datagram.from, datagram.buf.clone()));
            }
        }
    }
}

pub struct SimSocket {
    addr: SocketAddr,
    network: Arc<SimNetwork>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<(SocketAddr, Bytes)>>,
}

impl SimSocket {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl DatagramSocket for SimSocket {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        self.network.transmit(SentDatagram {
            from: self.addr,
            to,
            buf: Bytes::copy_from_slice(buf),
        });
        Ok(())
    }

    async fn recv_datagram(&self, timeout: Duration) -> anyhow::Result<Option<(SocketAddr, Bytes)>> {
        let mut inbound = self.inbound.lock().await;
        match time::timeout(timeout, inbound.recv()).await {
            Ok(Some(received)) => Ok(Some(received)),
            Ok(None) => anyhow::bail!("simulated network was dropped"),
            Err(_) => Ok(None),
        }
    }
}
