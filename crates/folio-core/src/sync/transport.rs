//! Direct data channels between two devices
//!
//! A [`DataChannel`] is one ordered, reliable, bidirectional stream of
//! [`ChannelMessage`] frames. Frames are CBOR bytes; on TCP each frame is
//! prefixed by a 4-byte little-endian length.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::message::ChannelMessage;
use super::{SyncError, SyncResult};

const LEN_SIZE: usize = 4;
/// Largest accepted frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const CHANNEL_DEPTH: usize = 32;

/// One end of a data channel
pub struct DataChannel {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl DataChannel {
    /// Two connected ends
    pub fn pair() -> (DataChannel, DataChannel) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
        (
            DataChannel { tx: a_tx, rx: b_rx },
            DataChannel { tx: b_tx, rx: a_rx },
        )
    }

    pub async fn send(&self, msg: &ChannelMessage) -> SyncResult<()> {
        send_frame(&self.tx, msg).await
    }

    /// Next message; `Ok(None)` once the other side has closed
    pub async fn recv(&mut self) -> SyncResult<Option<ChannelMessage>> {
        recv_frame(&mut self.rx).await
    }

    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (ChannelSender { tx: self.tx }, ChannelReceiver { rx: self.rx })
    }
}

/// Sending half of a [`DataChannel`]
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSender {
    pub async fn send(&self, msg: &ChannelMessage) -> SyncResult<()> {
        send_frame(&self.tx, msg).await
    }
}

/// Receiving half of a [`DataChannel`]
pub struct ChannelReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelReceiver {
    pub async fn recv(&mut self) -> SyncResult<Option<ChannelMessage>> {
        recv_frame(&mut self.rx).await
    }
}

async fn send_frame(tx: &mpsc::Sender<Vec<u8>>, msg: &ChannelMessage) -> SyncResult<()> {
    let bytes = msg.encode()?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(SyncError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            bytes.len()
        )));
    }
    tx.send(bytes)
        .await
        .map_err(|_| SyncError::Transport("channel closed".to_string()))
}

async fn recv_frame(rx: &mut mpsc::Receiver<Vec<u8>>) -> SyncResult<Option<ChannelMessage>> {
    match rx.recv().await {
        Some(bytes) => ChannelMessage::decode(&bytes).map(Some),
        None => Ok(None),
    }
}

/// Inbound connections for a listening device
pub struct Listener {
    endpoint: Option<String>,
    incoming: mpsc::Receiver<DataChannel>,
    accept_task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Address peers should connect to, if the transport uses one
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Next inbound channel; `None` once the listener is closed
    pub async fn accept(&mut self) -> Option<DataChannel> {
        self.incoming.recv().await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Opens data channels between devices
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start accepting connections addressed to `local`
    async fn listen(&self, local: &str) -> SyncResult<Listener>;

    /// Open a channel from `local` to `peer`
    async fn connect(
        &self,
        local: &str,
        peer: &str,
        endpoint: Option<&str>,
        connection_id: &str,
    ) -> SyncResult<DataChannel>;
}

/// In-process transport; devices sharing a clone can reach each other
#[derive(Clone, Default)]
pub struct MemoryTransport {
    listeners: Arc<Mutex<HashMap<String, mpsc::Sender<DataChannel>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, local: &str) -> SyncResult<Listener> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local.to_string(), tx);
        Ok(Listener {
            endpoint: None,
            incoming: rx,
            accept_task: None,
        })
    }

    async fn connect(
        &self,
        local: &str,
        peer: &str,
        _endpoint: Option<&str>,
        connection_id: &str,
    ) -> SyncResult<DataChannel> {
        let listener = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
            .ok_or_else(|| SyncError::Transport(format!("{} is not listening", peer)))?;

        let (ours, theirs) = DataChannel::pair();
        listener
            .send(theirs)
            .await
            .map_err(|_| SyncError::Transport(format!("{} stopped listening", peer)))?;
        debug!("Opened channel {} from {} to {}", connection_id, local, peer);
        Ok(ours)
    }
}

/// Length-prefixed frames over TCP
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    port: u16,
}

impl TcpTransport {
    /// Listen on `port`; 0 picks an ephemeral port
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, local: &str) -> SyncResult<Listener> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port)).await?;
        let endpoint = listener.local_addr()?.to_string();
        debug!("{} listening on {}", local, endpoint);

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        if tx.send(spawn_pumps(stream)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Listener {
            endpoint: Some(endpoint),
            incoming: rx,
            accept_task: Some(accept_task),
        })
    }

    async fn connect(
        &self,
        _local: &str,
        peer: &str,
        endpoint: Option<&str>,
        connection_id: &str,
    ) -> SyncResult<DataChannel> {
        let addr = endpoint
            .ok_or_else(|| SyncError::Transport(format!("no endpoint known for {}", peer)))?;
        let stream = TcpStream::connect(addr).await?;
        debug!("Connected to {} at {} ({})", peer, addr, connection_id);
        Ok(spawn_pumps(stream))
    }
}

/// Bridge a TCP stream to a [`DataChannel`]
fn spawn_pumps(stream: TcpStream) -> DataChannel {
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &frame).await {
                debug!("Write failed: {}", e);
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(Some(frame)) => {
                    if in_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Read failed: {}", e);
                    break;
                }
            }
        }
    });

    DataChannel {
        tx: out_tx,
        rx: in_rx,
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(frame.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(frame).await?;
    w.flush().await
}

/// Read one frame; `Ok(None)` on a clean end of stream
async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; LEN_SIZE];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {} exceeds limit", len),
        ));
    }
    let mut frame = vec![0u8; len];
    r.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(timestamp: i64) -> ChannelMessage {
        ChannelMessage::SyncAck { timestamp }
    }

    #[tokio::test]
    async fn test_pair_is_ordered_and_closes() {
        let (a, mut b) = DataChannel::pair();
        a.send(&ack(1)).await.unwrap();
        a.send(&ack(2)).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(ack(1)));
        assert_eq!(b.recv().await.unwrap(), Some(ack(2)));
        drop(a);
        assert_eq!(b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_transport_connects_listeners() {
        let transport = MemoryTransport::new();
        let mut listener = transport.listen("host").await.unwrap();
        assert!(listener.endpoint().is_none());

        let client = transport.connect("guest", "host", None, "c1").await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.send(&ack(7)).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(ack(7)));
    }

    #[tokio::test]
    async fn test_memory_transport_unknown_peer() {
        let transport = MemoryTransport::new();
        let err = transport
            .connect("guest", "nobody", None, "c1")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[tokio::test]
    async fn test_tcp_transport_exchanges_frames() {
        let transport = TcpTransport::new(0);
        let mut listener = transport.listen("host").await.unwrap();
        let port = listener
            .endpoint()
            .unwrap()
            .parse::<std::net::SocketAddr>()
            .unwrap()
            .port();
        let endpoint = format!("127.0.0.1:{}", port);

        let client = transport
            .connect("guest", "host", Some(&endpoint), "c1")
            .await
            .unwrap();
        let mut server = listener.accept().await.unwrap();

        client.send(&ack(1)).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(ack(1)));

        let (server_tx, _server_rx) = server.split();
        server_tx.send(&ack(2)).await.unwrap();
        let (_client_tx, mut client_rx) = client.split();
        assert_eq!(client_rx.recv().await.unwrap(), Some(ack(2)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let mut bytes = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        let mut reader = bytes.as_slice();
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }
}
