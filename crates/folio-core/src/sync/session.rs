//! Sync session
//!
//! One session per app instance. Owns the peer table, live connections,
//! and the background discovery tasks; consumers observe it through
//! [`SyncSession::subscribe`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use super::broadcast::BroadcastChannel;
use super::events::{EventSubscription, SyncDirection, SyncEvent, SyncHistory, SyncRecord};
use super::message::{BroadcastMessage, ChannelMessage};
use super::peer::{Peer, PeerChange, PeerStatus, PeerTable};
use super::transport::{ChannelReceiver, ChannelSender, DataChannel, Listener, Transport};
use super::{SyncError, SyncResult};
use crate::config::Config;
use crate::crypto::{self, SymmetricKey};
use crate::models::{new_id, now_millis, RawSnapshot, Snapshot};

/// Domain separation label for session keys
const SESSION_KEY_LABEL: &[u8] = b"folio-sync-v1";

/// How long an inbound HELLO waits for its `SYNC_REQUEST`
const CORRELATION_WAIT: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 256;

/// Pending announcements kept before the oldest are dropped
const MAX_ANNOUNCEMENTS: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device_id: String,
    pub device_name: String,
    pub advertise_interval: Duration,
    /// Bound on handshakes and on waiting for `SYNC_ACK`
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn from_config(config: &Config, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: config.effective_device_name(),
            advertise_interval: config.advertise_interval(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

struct Connection {
    connection_id: String,
    sender: ChannelSender,
    key: SymmetricKey,
    pending_ack: Arc<Mutex<Option<oneshot::Sender<i64>>>>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Stop the reader and fail any sync still waiting for an ack
    async fn close(self) {
        self.reader.abort();
        self.pending_ack.lock().await.take();
    }
}

struct Inner {
    config: SessionConfig,
    broadcast: Arc<dyn BroadcastChannel>,
    transport: Arc<dyn Transport>,
    peers: Mutex<PeerTable>,
    connections: Mutex<HashMap<String, Connection>>,
    /// (connectionId, fromDeviceId) pairs from `SYNC_REQUEST`s addressed to us
    announced: Mutex<Vec<(String, String)>>,
    announced_notify: Notify,
    endpoint: Mutex<Option<String>>,
    history: Mutex<SyncHistory>,
    events: broadcast::Sender<SyncEvent>,
    busy: StdMutex<HashSet<String>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    hosting: AtomicBool,
    listening: AtomicBool,
}

/// Discovery and encrypted sync with nearby devices
pub struct SyncSession {
    inner: Arc<Inner>,
}

impl SyncSession {
    pub fn new(
        config: SessionConfig,
        broadcast: Arc<dyn BroadcastChannel>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                broadcast,
                transport,
                peers: Mutex::new(PeerTable::new()),
                connections: Mutex::new(HashMap::new()),
                announced: Mutex::new(Vec::new()),
                announced_notify: Notify::new(),
                endpoint: Mutex::new(None),
                history: Mutex::new(SyncHistory::default()),
                events,
                busy: StdMutex::new(HashSet::new()),
                tasks: StdMutex::new(Vec::new()),
                hosting: AtomicBool::new(false),
                listening: AtomicBool::new(false),
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.inner.config.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.inner.config.device_name
    }

    pub fn is_hosting(&self) -> bool {
        self.inner.hosting.load(Ordering::SeqCst)
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.inner.events.subscribe())
    }

    /// Known peers, ordered by name
    pub async fn peers(&self) -> Vec<Peer> {
        self.inner.peers.lock().await.list()
    }

    pub async fn peer(&self, device_id: &str) -> Option<Peer> {
        self.inner.peers.lock().await.get(device_id).cloned()
    }

    /// Recent sync outcomes, newest first
    pub async fn history(&self) -> Vec<SyncRecord> {
        self.inner.history.lock().await.recent()
    }

    /// Accept connections and announce this device periodically
    pub async fn start_advertising(&self) -> SyncResult<()> {
        let inner = &self.inner;
        if !inner.broadcast.is_available() {
            return Err(SyncError::CapabilityUnavailable(
                "broadcast channel not available".to_string(),
            ));
        }
        if inner.hosting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = match inner.transport.listen(&inner.config.device_id).await {
            Ok(listener) => listener,
            Err(e) => {
                inner.hosting.store(false, Ordering::SeqCst);
                return Err(SyncError::CapabilityUnavailable(format!(
                    "cannot accept connections: {}",
                    e
                )));
            }
        };
        *inner.endpoint.lock().await = listener.endpoint().map(str::to_string);

        self.ensure_listening();
        let accept = tokio::spawn(accept_loop(inner.clone(), listener));
        let advertise = tokio::spawn(advertise_loop(inner.clone()));
        self.track(accept);
        self.track(advertise);

        info!(
            "Advertising {} ({}) every {:?}",
            inner.config.device_name, inner.config.device_id, inner.config.advertise_interval
        );
        Ok(())
    }

    /// Ask hosts on the channel to announce themselves
    pub async fn start_scanning(&self) -> SyncResult<()> {
        let inner = &self.inner;
        if !inner.broadcast.is_available() {
            return Err(SyncError::CapabilityUnavailable(
                "broadcast channel not available".to_string(),
            ));
        }
        self.ensure_listening();
        inner
            .broadcast
            .publish(&BroadcastMessage::DeviceDiscovery {
                device_id: inner.config.device_id.clone(),
                device_name: inner.config.device_name.clone(),
            })
            .await?;
        debug!("Scanning for devices");
        Ok(())
    }

    /// Announce departure, stop background tasks, and close every connection
    pub async fn stop(&self) {
        let inner = &self.inner;
        let was_hosting = inner.hosting.swap(false, Ordering::SeqCst);
        let was_listening = inner.listening.swap(false, Ordering::SeqCst);

        for task in self.take_tasks() {
            task.abort();
        }
        *inner.endpoint.lock().await = None;

        if (was_hosting || was_listening) && inner.broadcast.is_available() {
            let msg = BroadcastMessage::DeviceUnavailable {
                device_id: inner.config.device_id.clone(),
            };
            if let Err(e) = inner.broadcast.publish(&msg).await {
                warn!("Failed to announce departure: {}", e);
            }
        }

        let connections: Vec<(String, Connection)> =
            inner.connections.lock().await.drain().collect();
        for (peer_id, conn) in connections {
            conn.close().await;
            inner.mark(&peer_id, PeerStatus::Disconnected).await;
        }
        debug!("Sync session stopped");
    }

    /// Open an encrypted channel to a discovered peer.
    ///
    /// Succeeds immediately if already connected. On failure or timeout the
    /// peer returns to `Discovered`.
    pub async fn connect(&self, device_id: &str, timeout: Duration) -> SyncResult<()> {
        let inner = &self.inner;
        let peer = inner
            .peers
            .lock()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownPeer(device_id.to_string()))?;

        let _busy = BusyGuard::acquire(inner, device_id)?;
        if inner.connections.lock().await.contains_key(device_id) {
            return Ok(());
        }

        inner.mark(device_id, PeerStatus::Connecting).await;
        let connection_id = new_id();

        let outcome: SyncResult<(DataChannel, SymmetricKey)> = async {
            inner
                .broadcast
                .publish(&BroadcastMessage::SyncRequest {
                    from_device_id: inner.config.device_id.clone(),
                    to_device_id: device_id.to_string(),
                    connection_id: connection_id.clone(),
                })
                .await?;
            match tokio::time::timeout(timeout, inner.handshake_outbound(&peer, &connection_id))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    device_id, timeout
                ))),
            }
        }
        .await;

        match outcome {
            Ok((channel, key)) => {
                inner.install(device_id, &connection_id, channel, key).await;
                Ok(())
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", device_id, e);
                if let Some(peer) = inner
                    .peers
                    .lock()
                    .await
                    .set_status(device_id, PeerStatus::Discovered)
                {
                    inner.emit(SyncEvent::PeerUpdated(peer));
                }
                inner.emit(SyncEvent::Error {
                    peer: Some(device_id.to_string()),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Send a snapshot to a connected peer and wait for its `SYNC_ACK`
    pub async fn sync(&self, device_id: &str, snapshot: &Snapshot) -> SyncResult<()> {
        let inner = &self.inner;
        let _busy = BusyGuard::acquire(inner, device_id)?;

        let (sender, key, pending_ack) = {
            let connections = inner.connections.lock().await;
            let conn = connections
                .get(device_id)
                .ok_or_else(|| SyncError::NotConnected(device_id.to_string()))?;
            (conn.sender.clone(), conn.key.clone(), conn.pending_ack.clone())
        };

        let result: SyncResult<()> = async {
            let plaintext = serde_json::to_vec(&RawSnapshot::from(snapshot))
                .map_err(|e| SyncError::Protocol(e.to_string()))?;
            let ciphertext = crypto::encrypt(&plaintext, &key)?;

            let (ack_tx, ack_rx) = oneshot::channel();
            *pending_ack.lock().await = Some(ack_tx);

            sender
                .send(&ChannelMessage::SyncData {
                    ciphertext,
                    timestamp: now_millis(),
                    from_device: inner.config.device_id.clone(),
                })
                .await?;
            debug!("Sent snapshot to {}", device_id);

            match tokio::time::timeout(inner.config.connect_timeout, ack_rx).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(_)) => Err(SyncError::Transport(
                    "connection closed before SYNC_ACK".to_string(),
                )),
                Err(_) => Err(SyncError::Timeout(format!(
                    "no SYNC_ACK from {}",
                    device_id
                ))),
            }
        }
        .await;

        match result {
            Ok(()) => {
                inner
                    .record(SyncRecord::new(device_id, SyncDirection::Sent, None))
                    .await;
                inner.emit(SyncEvent::SyncComplete {
                    peer: device_id.to_string(),
                });
                info!("Sync with {} complete", device_id);
                Ok(())
            }
            Err(e) => {
                pending_ack.lock().await.take();
                inner
                    .record(SyncRecord::new(
                        device_id,
                        SyncDirection::Sent,
                        Some(e.to_string()),
                    ))
                    .await;
                inner.emit(SyncEvent::Error {
                    peer: Some(device_id.to_string()),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Close the connection to one peer
    pub async fn disconnect(&self, device_id: &str) {
        let removed = self.inner.connections.lock().await.remove(device_id);
        if let Some(conn) = removed {
            conn.close().await;
            self.inner.mark(device_id, PeerStatus::Disconnected).await;
        }
    }

    fn ensure_listening(&self) {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        let rx = self.inner.broadcast.subscribe();
        let task = tokio::spawn(message_loop(self.inner.clone(), rx));
        self.track(task);
    }

    fn track(&self, task: JoinHandle<()>) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        for task in self.take_tasks() {
            task.abort();
        }
        if let Ok(mut connections) = self.inner.connections.try_lock() {
            for (_, conn) in connections.drain() {
                conn.reader.abort();
            }
        }
    }
}

/// Marks a peer as having an operation in flight until dropped
struct BusyGuard<'a> {
    inner: &'a Inner,
    device_id: String,
}

impl<'a> BusyGuard<'a> {
    fn acquire(inner: &'a Inner, device_id: &str) -> SyncResult<Self> {
        let mut busy = inner.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(device_id.to_string()) {
            return Err(SyncError::Busy(device_id.to_string()));
        }
        Ok(Self {
            inner,
            device_id: device_id.to_string(),
        })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device_id);
    }
}

impl Inner {
    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn record(&self, record: SyncRecord) {
        self.history.lock().await.push(record);
    }

    async fn mark(&self, device_id: &str, status: PeerStatus) {
        let updated = self.peers.lock().await.set_status(device_id, status);
        let Some(peer) = updated else {
            return;
        };
        let event = match status {
            PeerStatus::Connected => SyncEvent::PeerConnected(peer),
            PeerStatus::Disconnected => SyncEvent::PeerDisconnected(peer),
            PeerStatus::Offline => SyncEvent::PeerOffline(peer),
            PeerStatus::Discovered | PeerStatus::Connecting => SyncEvent::PeerUpdated(peer),
        };
        self.emit(event);
    }

    async fn observe(&self, device_id: &str, device_name: &str, endpoint: Option<String>) {
        let change = self
            .peers
            .lock()
            .await
            .observe(device_id, device_name, endpoint);
        match change {
            PeerChange::Discovered(peer) => {
                debug!("Discovered {} ({})", peer.device_name, peer.device_id);
                self.emit(SyncEvent::PeerDiscovered(peer));
            }
            PeerChange::Updated(peer) => self.emit(SyncEvent::PeerUpdated(peer)),
        }
    }

    async fn announce(&self) -> SyncResult<()> {
        let endpoint = self.endpoint.lock().await.clone();
        self.broadcast
            .publish(&BroadcastMessage::DeviceAvailable {
                device_id: self.config.device_id.clone(),
                device_name: self.config.device_name.clone(),
                timestamp: now_millis(),
                endpoint,
            })
            .await
    }

    async fn handle_broadcast(&self, msg: BroadcastMessage) {
        if msg.sender() == self.config.device_id {
            return;
        }
        match msg {
            BroadcastMessage::DeviceAvailable {
                device_id,
                device_name,
                endpoint,
                ..
            } => {
                self.observe(&device_id, &device_name, endpoint).await;
            }
            BroadcastMessage::DeviceDiscovery {
                device_id,
                device_name,
            } => {
                self.observe(&device_id, &device_name, None).await;
                if self.hosting.load(Ordering::SeqCst) {
                    if let Err(e) = self.announce().await {
                        warn!("Failed to answer discovery: {}", e);
                    }
                }
            }
            BroadcastMessage::DeviceUnavailable { device_id } => {
                let removed = self.connections.lock().await.remove(&device_id);
                if let Some(conn) = removed {
                    conn.close().await;
                }
                self.mark(&device_id, PeerStatus::Offline).await;
            }
            BroadcastMessage::SyncRequest {
                from_device_id,
                to_device_id,
                connection_id,
            } => {
                if to_device_id != self.config.device_id {
                    return;
                }
                let mut announced = self.announced.lock().await;
                if announced.len() >= MAX_ANNOUNCEMENTS {
                    announced.remove(0);
                }
                announced.push((connection_id, from_device_id));
                drop(announced);
                self.announced_notify.notify_waiters();
            }
        }
    }

    /// Wait briefly for the `SYNC_REQUEST` matching an inbound connection
    async fn take_announcement(&self, connection_id: &str) -> Option<String> {
        let deadline = Instant::now() + CORRELATION_WAIT;
        loop {
            let notified = self.announced_notify.notified();
            {
                let mut announced = self.announced.lock().await;
                if let Some(pos) = announced.iter().position(|(id, _)| id == connection_id) {
                    return Some(announced.remove(pos).1);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    async fn handshake_outbound(
        &self,
        peer: &Peer,
        connection_id: &str,
    ) -> SyncResult<(DataChannel, SymmetricKey)> {
        let mut channel = self
            .transport
            .connect(
                &self.config.device_id,
                &peer.device_id,
                peer.endpoint.as_deref(),
                connection_id,
            )
            .await?;

        let secret = ephemeral_secret();
        channel.send(&self.hello(connection_id, &secret)).await?;

        let reply = channel
            .recv()
            .await?
            .ok_or_else(|| SyncError::Transport("closed during handshake".to_string()))?;
        let ChannelMessage::Hello {
            connection_id: their_connection,
            device_id,
            public_key,
            ..
        } = reply
        else {
            return Err(SyncError::Protocol(format!(
                "expected HELLO, got {}",
                reply.kind()
            )));
        };
        if their_connection != connection_id {
            return Err(SyncError::Protocol("HELLO for another connection".to_string()));
        }
        if device_id != peer.device_id {
            return Err(SyncError::Protocol(format!(
                "expected {} but {} answered",
                peer.device_id, device_id
            )));
        }

        let key = derive_session_key(&secret, &public_key, connection_id)?;
        Ok((channel, key))
    }

    /// Returns the peer id, connection id and session key for an accepted channel
    async fn handshake_inbound(
        &self,
        channel: &mut DataChannel,
    ) -> SyncResult<(String, String, SymmetricKey)> {
        let first = channel
            .recv()
            .await?
            .ok_or_else(|| SyncError::Transport("closed before HELLO".to_string()))?;
        let ChannelMessage::Hello {
            connection_id,
            device_id,
            device_name,
            public_key,
        } = first
        else {
            return Err(SyncError::Protocol(format!(
                "expected HELLO, got {}",
                first.kind()
            )));
        };
        if device_id == self.config.device_id {
            return Err(SyncError::Protocol("connection from self".to_string()));
        }

        match self.take_announcement(&connection_id).await {
            Some(from) if from != device_id => {
                return Err(SyncError::Protocol(format!(
                    "HELLO from {} contradicts SYNC_REQUEST from {}",
                    device_id, from
                )));
            }
            Some(_) => {}
            None => debug!("No SYNC_REQUEST seen for connection {}", connection_id),
        }

        self.observe(&device_id, &device_name, None).await;

        let secret = ephemeral_secret();
        channel.send(&self.hello(&connection_id, &secret)).await?;
        let key = derive_session_key(&secret, &public_key, &connection_id)?;
        Ok((device_id, connection_id, key))
    }

    fn hello(&self, connection_id: &str, secret: &StaticSecret) -> ChannelMessage {
        ChannelMessage::Hello {
            connection_id: connection_id.to_string(),
            device_id: self.config.device_id.clone(),
            device_name: self.config.device_name.clone(),
            public_key: PublicKey::from(secret).as_bytes().to_vec(),
        }
    }

    /// Register a completed handshake and start reading from it
    async fn install(
        self: &Arc<Self>,
        peer_id: &str,
        connection_id: &str,
        channel: DataChannel,
        key: SymmetricKey,
    ) {
        let (sender, receiver) = channel.split();
        let pending_ack = Arc::new(Mutex::new(None));
        {
            let mut connections = self.connections.lock().await;
            let reader = tokio::spawn(reader_loop(
                self.clone(),
                peer_id.to_string(),
                connection_id.to_string(),
                receiver,
                sender.clone(),
                key.clone(),
                pending_ack.clone(),
            ));
            let previous = connections.insert(
                peer_id.to_string(),
                Connection {
                    connection_id: connection_id.to_string(),
                    sender,
                    key,
                    pending_ack,
                    reader,
                },
            );
            if let Some(previous) = previous {
                debug!("Replacing connection {} to {}", previous.connection_id, peer_id);
                previous.close().await;
            }
        }
        self.mark(peer_id, PeerStatus::Connected).await;
        info!("Connected to {}", peer_id);
    }

    async fn handle_sync_data(
        &self,
        peer_id: &str,
        sender: &ChannelSender,
        key: &SymmetricKey,
        ciphertext: &crypto::EncryptedPayload,
    ) -> SyncResult<()> {
        let plaintext = crypto::decrypt(ciphertext, key)?;
        let snapshot: RawSnapshot = serde_json::from_slice(&plaintext)
            .map_err(|e| SyncError::Protocol(format!("snapshot is not valid JSON: {}", e)))?;

        self.emit(SyncEvent::DataReceived {
            from: peer_id.to_string(),
            snapshot,
        });
        sender
            .send(&ChannelMessage::SyncAck {
                timestamp: now_millis(),
            })
            .await
    }
}

fn ephemeral_secret() -> StaticSecret {
    StaticSecret::from(*crypto::generate_ephemeral_key().as_bytes())
}

/// SHA-256 over label, X25519 shared secret and connection id
fn derive_session_key(
    secret: &StaticSecret,
    their_public: &[u8],
    connection_id: &str,
) -> SyncResult<SymmetricKey> {
    let bytes: [u8; 32] = their_public
        .try_into()
        .map_err(|_| SyncError::Protocol("public key must be 32 bytes".to_string()))?;
    let shared = secret.diffie_hellman(&PublicKey::from(bytes));

    let mut hasher = Sha256::new();
    hasher.update(SESSION_KEY_LABEL);
    hasher.update(shared.as_bytes());
    hasher.update(connection_id.as_bytes());
    Ok(SymmetricKey::from_bytes(hasher.finalize().into()))
}

async fn message_loop(inner: Arc<Inner>, mut rx: broadcast::Receiver<BroadcastMessage>) {
    loop {
        match rx.recv().await {
            Ok(msg) => inner.handle_broadcast(msg).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Discovery fell behind; {} messages dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn advertise_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.advertise_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = inner.announce().await {
            warn!("Advertise failed: {}", e);
            inner.emit(SyncEvent::Error {
                peer: None,
                error: e.to_string(),
            });
        }
    }
}

async fn accept_loop(inner: Arc<Inner>, mut listener: Listener) {
    while let Some(channel) = listener.accept().await {
        let inner = inner.clone();
        tokio::spawn(async move {
            let mut channel = channel;
            let timeout = inner.config.connect_timeout;
            let outcome =
                match tokio::time::timeout(timeout, inner.handshake_inbound(&mut channel)).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout("inbound handshake".to_string())),
                };
            match outcome {
                Ok((peer_id, connection_id, key)) => {
                    inner.install(&peer_id, &connection_id, channel, key).await;
                }
                Err(e) => {
                    warn!("Rejected inbound connection: {}", e);
                    inner.emit(SyncEvent::Error {
                        peer: None,
                        error: e.to_string(),
                    });
                }
            }
        });
    }
    debug!("Listener closed");
}

async fn reader_loop(
    inner: Arc<Inner>,
    peer_id: String,
    connection_id: String,
    mut receiver: ChannelReceiver,
    sender: ChannelSender,
    key: SymmetricKey,
    pending_ack: Arc<Mutex<Option<oneshot::Sender<i64>>>>,
) {
    loop {
        match receiver.recv().await {
            Ok(Some(ChannelMessage::SyncData {
                ciphertext,
                from_device,
                ..
            })) => {
                if from_device != peer_id {
                    debug!("SYNC_DATA on {}'s channel claims {}", peer_id, from_device);
                }
                let outcome = inner
                    .handle_sync_data(&peer_id, &sender, &key, &ciphertext)
                    .await;
                let error = outcome.as_ref().err().map(|e| e.to_string());
                inner
                    .record(SyncRecord::new(&peer_id, SyncDirection::Received, error))
                    .await;
                if let Err(e) = outcome {
                    warn!("Dropped snapshot from {}: {}", peer_id, e);
                    inner.emit(SyncEvent::Error {
                        peer: Some(peer_id.clone()),
                        error: e.to_string(),
                    });
                }
            }
            Ok(Some(ChannelMessage::SyncAck { timestamp })) => {
                if let Some(waiter) = pending_ack.lock().await.take() {
                    let _ = waiter.send(timestamp);
                } else {
                    debug!("Unexpected SYNC_ACK from {}", peer_id);
                }
            }
            Ok(Some(other)) => {
                debug!("Ignoring {} from {}", other.kind(), peer_id);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed frame from {}: {}", peer_id, e);
                inner.emit(SyncEvent::Error {
                    peer: Some(peer_id.clone()),
                    error: e.to_string(),
                });
            }
        }
    }

    // A sync waiting on this channel will never see its ack
    pending_ack.lock().await.take();

    // Only tear down if this channel is still the current one
    let current = {
        let mut connections = inner.connections.lock().await;
        match connections.get(&peer_id) {
            Some(conn) if conn.connection_id == connection_id => {
                connections.remove(&peer_id);
                true
            }
            _ => false,
        }
    };
    if current {
        debug!("Channel to {} closed", peer_id);
        inner.mark(&peer_id, PeerStatus::Disconnected).await;
    }
}
