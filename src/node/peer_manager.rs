use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use log::{debug, error};
use tokio::sync::RwLock;

use crate::node::{message::Message, peer::PeerHandle};

/// Single owner of the peer table: `opened` holds one live outbound socket
/// per advertised address, `connected` the set of addresses we have
/// exchanged handshakes with. No other component mutates either.
pub struct PeerManager {
    opened: RwLock<HashMap<String, PeerHandle>>,
    connected: RwLock<HashSet<String>>,
}

impl PeerManager {
    pub fn new() -> PeerManager {
        PeerManager {
            opened: RwLock::new(HashMap::new()),
            connected: RwLock::new(HashSet::new()),
        }
    }

    pub async fn is_open(&self, address: &str) -> bool {
        self.opened.read().await.contains_key(address)
    }

    pub async fn is_known(&self, address: &str) -> bool {
        self.opened.read().await.contains_key(address)
            || self.connected.read().await.contains(address)
    }

    /// Register an opened peer; duplicate addresses keep the first socket
    pub async fn insert(&self, handle: PeerHandle) -> bool {
        let mut opened = self.opened.write().await;
        if opened.contains_key(&handle.address) {
            return false;
        }
        opened.insert(handle.address.clone(), handle);
        true
    }

    pub async fn mark_connected(&self, address: &str) {
        self.connected.write().await.insert(address.to_string());
    }

    pub async fn remove(&self, address: &str) {
        self.opened.write().await.remove(address);
        self.connected.write().await.remove(address);
    }

    pub async fn connected_addresses(&self) -> Vec<String> {
        self.connected.read().await.iter().cloned().collect()
    }

    pub async fn open_handles(&self) -> Vec<PeerHandle> {
        self.opened.read().await.values().cloned().collect()
    }

    /// Forward a message to all opened peers concurrently
    pub async fn broadcast(&self, message: Message) {
        let peers = self.open_handles().await;

        let sends = peers.into_iter().map(|peer| {
            let message = message.clone();
            async move {
                if let Err(e) = peer.send(message).await {
                    error!("Broadcast to {} failed: {e}", peer.address);
                }
            }
        });
        join_all(sends).await;
    }

    /// Send to one peer by advertised address; false when no socket is open
    pub async fn send_to(&self, address: &str, message: Message) -> bool {
        let handle = self.opened.read().await.get(address).cloned();
        match handle {
            Some(peer) => match peer.send(message).await {
                Ok(()) => true,
                Err(e) => {
                    debug!("Send to {address} failed: {e}");
                    false
                }
            },
            None => false,
        }
    }
}

impl Default for PeerManager {
    fn default() -> Self {
        PeerManager::new()
    }
}
