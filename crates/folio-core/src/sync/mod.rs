//! Device-to-device sync over the local network
//!
//! ## Protocol
//!
//! 1. Hosts broadcast `DEVICE_AVAILABLE` every advertise interval
//! 2. Scanners broadcast `DEVICE_DISCOVERY`; hosts answer at once
//! 3. The initiator announces `SYNC_REQUEST` and opens a data channel
//! 4. Both sides exchange `HELLO` with ephemeral X25519 public keys
//! 5. `SYNC_DATA` carries an encrypted snapshot, answered by `SYNC_ACK`
//!
//! ## Usage
//!
//! ```ignore
//! let session = SyncSession::new(config, broadcast, transport);
//! session.start_scanning().await?;
//! session.connect(&peer_id, timeout).await?;
//! session.sync(&peer_id, &snapshot).await?;
//! ```

pub mod broadcast;
pub mod events;
pub mod message;
pub mod peer;
pub mod session;
pub mod transport;

pub use broadcast::{BroadcastChannel, LocalBroadcast, MulticastBroadcast};
pub use events::{EventSubscription, SyncDirection, SyncEvent, SyncRecord};
pub use message::{BroadcastMessage, ChannelMessage};
pub use peer::{Peer, PeerStatus};
pub use session::{SessionConfig, SyncSession};
pub use transport::{DataChannel, Listener, MemoryTransport, TcpTransport, Transport};

use crate::crypto::CryptoError;

/// Errors from discovery and sync
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    /// A platform primitive needed for discovery or hosting is missing
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("authentication failed: wrong key or tampered payload")]
    Authentication,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("an operation is already in progress with {0}")]
    Busy(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("not connected to {0}")]
    NotConnected(String),
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => SyncError::Authentication,
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
