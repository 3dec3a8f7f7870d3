//! Broadcast channels for discovery traffic
//!
//! Every participant on a channel receives every message, including its
//! own; filtering by device id happens in the session.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::message::BroadcastMessage;
use super::{SyncError, SyncResult};

/// Multicast group for discovery datagrams
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);

const CHANNEL_CAPACITY: usize = 256;

/// A shared message bus for discovery
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Whether the underlying primitive exists on this platform
    fn is_available(&self) -> bool;

    async fn publish(&self, msg: &BroadcastMessage) -> SyncResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage>;
}

/// In-process bus
#[derive(Clone)]
pub struct LocalBroadcast {
    tx: broadcast::Sender<BroadcastMessage>,
    available: bool,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, available: true }
    }

    /// A bus that reports itself missing
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastChannel for LocalBroadcast {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn publish(&self, msg: &BroadcastMessage) -> SyncResult<()> {
        if !self.available {
            return Err(SyncError::CapabilityUnavailable(
                "local broadcast disabled".to_string(),
            ));
        }
        // No subscribers is not an error
        let _ = self.tx.send(msg.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }
}

/// UDP multicast on the local link
pub struct MulticastBroadcast {
    socket: Option<Arc<UdpSocket>>,
    dest: SocketAddr,
    tx: broadcast::Sender<BroadcastMessage>,
    recv_task: Option<JoinHandle<()>>,
}

impl MulticastBroadcast {
    /// Join the discovery group on `port`. A socket that cannot be set up
    /// leaves the channel unavailable rather than failing.
    pub fn new(port: u16) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let dest = SocketAddr::from((MULTICAST_GROUP, port));

        match make_multicast_socket(port) {
            Ok(socket) => {
                let socket = Arc::new(socket);
                let recv_task = tokio::spawn(recv_loop(socket.clone(), tx.clone()));
                debug!("Joined discovery group {} on port {}", MULTICAST_GROUP, port);
                Self {
                    socket: Some(socket),
                    dest,
                    tx,
                    recv_task: Some(recv_task),
                }
            }
            Err(e) => {
                warn!("Multicast discovery unavailable: {}", e);
                Self {
                    socket: None,
                    dest,
                    tx,
                    recv_task: None,
                }
            }
        }
    }
}

impl Drop for MulticastBroadcast {
    fn drop(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
    }
}

fn make_multicast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = bind_shared(port)?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

/// Bind the discovery port so several processes on one host can share it
fn bind_shared(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket.into())
}

async fn recv_loop(socket: Arc<UdpSocket>, tx: broadcast::Sender<BroadcastMessage>) {
    let mut buf = vec![0u8; 65536];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => match BroadcastMessage::decode(&buf[..n]) {
                Ok(msg) => {
                    let _ = tx.send(with_sender_host(msg, from));
                }
                Err(e) => debug!("Ignoring datagram from {}: {}", from, e),
            },
            Err(e) => {
                warn!("Discovery socket closed: {}", e);
                break;
            }
        }
    }
}

/// Hosts listen on the unspecified address; substitute the address the
/// datagram actually came from.
fn with_sender_host(msg: BroadcastMessage, from: SocketAddr) -> BroadcastMessage {
    match msg {
        BroadcastMessage::DeviceAvailable {
            device_id,
            device_name,
            timestamp,
            endpoint: Some(endpoint),
        } => {
            let endpoint = match endpoint.parse::<SocketAddr>() {
                Ok(addr) if addr.ip().is_unspecified() => {
                    SocketAddr::new(from.ip(), addr.port()).to_string()
                }
                _ => endpoint,
            };
            BroadcastMessage::DeviceAvailable {
                device_id,
                device_name,
                timestamp,
                endpoint: Some(endpoint),
            }
        }
        other => other,
    }
}

#[async_trait]
impl BroadcastChannel for MulticastBroadcast {
    fn is_available(&self) -> bool {
        self.socket.is_some()
    }

    async fn publish(&self, msg: &BroadcastMessage) -> SyncResult<()> {
        let Some(ref socket) = self.socket else {
            return Err(SyncError::CapabilityUnavailable(
                "multicast socket not bound".to_string(),
            ));
        };
        let bytes = msg.encode()?;
        socket.send_to(&bytes, self.dest).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }
}
