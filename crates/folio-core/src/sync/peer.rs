//! Peer bookkeeping

use std::collections::HashMap;

use serde::Serialize;

use crate::models::now_millis;

/// Per-peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
    Offline,
}

impl PeerStatus {
    /// States a peer leaves when it is seen again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerStatus::Disconnected | PeerStatus::Offline)
    }
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerStatus::Discovered => "discovered",
            PeerStatus::Connecting => "connecting",
            PeerStatus::Connected => "connected",
            PeerStatus::Disconnected => "disconnected",
            PeerStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// A device seen on the broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub device_id: String,
    pub device_name: String,
    pub status: PeerStatus,
    pub endpoint: Option<String>,
    /// Milliseconds since the epoch
    pub last_seen: i64,
}

/// What an observation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerChange {
    /// First sighting, or back from a terminal state
    Discovered(Peer),
    Updated(Peer),
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<String, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of a device
    pub fn observe(
        &mut self,
        device_id: &str,
        device_name: &str,
        endpoint: Option<String>,
    ) -> PeerChange {
        let now = now_millis();
        match self.peers.get_mut(device_id) {
            Some(peer) => {
                peer.last_seen = now;
                peer.device_name = device_name.to_string();
                if endpoint.is_some() {
                    peer.endpoint = endpoint;
                }
                if peer.status.is_terminal() {
                    peer.status = PeerStatus::Discovered;
                    PeerChange::Discovered(peer.clone())
                } else {
                    PeerChange::Updated(peer.clone())
                }
            }
            None => {
                let peer = Peer {
                    device_id: device_id.to_string(),
                    device_name: device_name.to_string(),
                    status: PeerStatus::Discovered,
                    endpoint,
                    last_seen: now,
                };
                self.peers.insert(device_id.to_string(), peer.clone());
                PeerChange::Discovered(peer)
            }
        }
    }

    /// Move a known peer to a new state; returns the updated peer
    pub fn set_status(&mut self, device_id: &str, status: PeerStatus) -> Option<Peer> {
        let peer = self.peers.get_mut(device_id)?;
        peer.status = status;
        Some(peer.clone())
    }

    pub fn get(&self, device_id: &str) -> Option<&Peer> {
        self.peers.get(device_id)
    }

    /// All peers, ordered by name
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| {
            a.device_name
                .cmp(&b.device_name)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        peers
    }
}
