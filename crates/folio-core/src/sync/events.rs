//! Session events and the bounded sync history

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::broadcast;

use super::peer::Peer;
use crate::models::{now_millis, RawSnapshot};

/// Number of sync outcomes kept in memory
pub const MAX_SYNC_RECORDS: usize = 20;

/// Events emitted by a [`super::SyncSession`]
#[derive(Debug, Clone)]
pub enum SyncEvent {
    PeerDiscovered(Peer),
    PeerUpdated(Peer),
    PeerConnected(Peer),
    PeerDisconnected(Peer),
    PeerOffline(Peer),
    /// A decrypted snapshot, not yet validated
    DataReceived { from: String, snapshot: RawSnapshot },
    SyncComplete { peer: String },
    /// A failure isolated to one peer, or to discovery when `peer` is `None`
    Error { peer: Option<String>, error: String },
}

/// A live event stream. Dropping it unsubscribes.
pub struct EventSubscription {
    rx: broadcast::Receiver<SyncEvent>,
}

impl EventSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<SyncEvent>) -> Self {
        Self { rx }
    }

    /// Next event; `None` once the session is gone
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged; {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub peer: String,
    pub direction: SyncDirection,
    pub timestamp: i64,
    /// `None` on success
    pub error: Option<String>,
}

impl SyncRecord {
    pub fn new(peer: &str, direction: SyncDirection, error: Option<String>) -> Self {
        Self {
            peer: peer.to_string(),
            direction,
            timestamp: now_millis(),
            error,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Most recent sync outcomes, oldest evicted first
#[derive(Debug, Default)]
pub struct SyncHistory {
    records: VecDeque<SyncRecord>,
}

impl SyncHistory {
    pub fn push(&mut self, record: SyncRecord) {
        if self.records.len() == MAX_SYNC_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Records, newest first
    pub fn recent(&self) -> Vec<SyncRecord> {
        self.records.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = SyncHistory::default();
        for i in 0..(MAX_SYNC_RECORDS + 5) {
            history.push(SyncRecord::new(&format!("peer-{}", i), SyncDirection::Sent, None));
        }
        let recent = history.recent();
        assert_eq!(recent.len(), MAX_SYNC_RECORDS);
        assert_eq!(recent[0].peer, format!("peer-{}", MAX_SYNC_RECORDS + 4));
        assert_eq!(recent.last().unwrap().peer, "peer-5");
    }

    #[tokio::test]
    async fn test_subscription_receives_and_closes() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = EventSubscription::new(rx);
        tx.send(SyncEvent::SyncComplete { peer: "p".into() }).unwrap();
        assert!(matches!(sub.recv().await, Some(SyncEvent::SyncComplete { .. })));
        drop(tx);
        assert!(sub.recv().await.is_none());
    }
}
