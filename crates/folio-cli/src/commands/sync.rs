//! Nearby-device sync commands

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::{sleep, Instant};
use tracing::info;

use folio_core::sync::{
    BroadcastChannel, MulticastBroadcast, SessionConfig, TcpTransport, Transport,
};
use folio_core::{DeviceIdentity, Peer, Store, SyncEvent, SyncSession};

use crate::output::{short_id, Output};

const PEER_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn open_session(store: &Store) -> Result<SyncSession> {
    let config = store.config();
    let identity = DeviceIdentity::load_or_create(config)?;
    let broadcast: Arc<dyn BroadcastChannel> =
        Arc::new(MulticastBroadcast::new(config.discovery_port));
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(config.transport_port));
    Ok(SyncSession::new(
        SessionConfig::from_config(config, identity.device_id),
        broadcast,
        transport,
    ))
}

/// Advertise this device and apply whatever peers send
pub async fn host(store: &Store, duration: Option<u64>, output: &Output) -> Result<()> {
    let session = open_session(store)?;
    let mut events = session.subscribe();
    session
        .start_advertising()
        .await
        .context("Cannot host on this network")?;

    output.message(&format!(
        "Hosting as '{}'. Waiting for devices (Ctrl-C to stop)...",
        session.device_name()
    ));

    let deadline = sleep(duration.map_or(Duration::MAX, Duration::from_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_host_event(store, event, output).await?;
            }
        }
    }

    session.stop().await;
    output.print_history(&session.history().await);
    Ok(())
}

async fn handle_host_event(store: &Store, event: SyncEvent, output: &Output) -> Result<()> {
    match event {
        SyncEvent::PeerConnected(peer) => {
            output.message(&format!("Connected: {}", peer.device_name));
        }
        SyncEvent::PeerDisconnected(peer) => {
            output.message(&format!("Disconnected: {}", peer.device_name));
        }
        SyncEvent::DataReceived { from, snapshot } => {
            output.message(&format!("Receiving library from {}", short_id(&from)));
            let recovery = store.apply_snapshot(&snapshot).await?;
            store.flush().await?;
            info!(
                "Applied snapshot from {} ({} entries, {:?})",
                from,
                recovery.entries.len(),
                recovery.source
            );
            output.print_recovery(&recovery);
        }
        SyncEvent::Error { peer, error } => match peer {
            Some(peer) => output.message(&format!("! {}: {}", short_id(&peer), error)),
            None => output.message(&format!("! {}", error)),
        },
        _ => {}
    }
    Ok(())
}

/// List devices that answer within `timeout` seconds
pub async fn scan(store: &Store, timeout: u64, output: &Output) -> Result<()> {
    let session = open_session(store)?;
    session
        .start_scanning()
        .await
        .context("Cannot scan on this network")?;
    output.message("Looking for devices...");

    sleep(Duration::from_secs(timeout)).await;

    let peers = session.peers().await;
    session.stop().await;
    output.print_peers(&peers);
    Ok(())
}

/// Find a device and send it the whole library
pub async fn send(store: &Store, device: &str, timeout: u64, output: &Output) -> Result<()> {
    let session = open_session(store)?;
    session
        .start_scanning()
        .await
        .context("Cannot scan on this network")?;
    output.message(&format!("Looking for '{}'...", device));

    let deadline = Instant::now() + Duration::from_secs(timeout);
    let peer = loop {
        if let Some(peer) = match_peer(&session.peers().await, device)? {
            break peer;
        }
        if Instant::now() >= deadline {
            session.stop().await;
            bail!("No device matching '{}' found", device);
        }
        sleep(PEER_POLL_INTERVAL).await;
    };

    let result = async {
        session
            .connect(&peer.device_id, store.config().connect_timeout())
            .await
            .with_context(|| format!("Failed to connect to {}", peer.device_name))?;
        session
            .sync(&peer.device_id, &store.snapshot())
            .await
            .with_context(|| format!("Failed to sync with {}", peer.device_name))?;
        Ok::<_, anyhow::Error>(())
    }
    .await;
    session.stop().await;
    result?;

    output.success(&format!(
        "Sent {} entries to {}",
        store.entries().len(),
        peer.device_name
    ));
    Ok(())
}

/// Pick the peer named by `query`: exact id, then unique id prefix, then
/// unique case-insensitive device name
fn match_peer(peers: &[Peer], query: &str) -> Result<Option<Peer>> {
    if let Some(peer) = peers.iter().find(|p| p.device_id == query) {
        return Ok(Some(peer.clone()));
    }

    let by_prefix: Vec<&Peer> = peers
        .iter()
        .filter(|p| p.device_id.starts_with(query))
        .collect();
    let by_name: Vec<&Peer> = peers
        .iter()
        .filter(|p| p.device_name.eq_ignore_ascii_case(query))
        .collect();

    let candidates = if by_prefix.is_empty() {
        by_name
    } else {
        by_prefix
    };
    match candidates.as_slice() {
        [] => Ok(None),
        [peer] => Ok(Some((*peer).clone())),
        _ => bail!(
            "'{}' matches {} devices; use the device ID",
            query,
            candidates.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::PeerStatus;

    fn peer(id: &str, name: &str) -> Peer {
        Peer {
            device_id: id.to_string(),
            device_name: name.to_string(),
            status: PeerStatus::Discovered,
            endpoint: None,
            last_seen: 0,
        }
    }

    #[test]
    fn test_match_peer() {
        let peers = vec![peer("abc123", "Laptop"), peer("abd456", "Phone")];

        assert_eq!(match_peer(&peers, "abc123").unwrap().unwrap().device_name, "Laptop");
        assert_eq!(match_peer(&peers, "abd").unwrap().unwrap().device_name, "Phone");
        assert_eq!(match_peer(&peers, "phone").unwrap().unwrap().device_id, "abd456");
        assert!(match_peer(&peers, "ab").is_err());
        assert!(match_peer(&peers, "tablet").unwrap().is_none());
    }
}
