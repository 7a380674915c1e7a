//! In-memory address book keyed by peer id.
//!
//! Holds everything learned about a peer during a probe: transport addresses,
//! advertised protocols (from identify), the verified public key, and the
//! remote agent version. Nothing is persisted.

use std::collections::HashMap;

use parking_lot::RwLock;
use peerscope_identity::{Multiaddr, PeerAddrInfo, PeerId, PublicKey, split_p2p};
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum PeerstoreError {
    #[error("public key does not match peer id {expected} (derives {actual})")]
    KeyMismatch { expected: PeerId, actual: PeerId },
}

/// Snapshot of a single peer's record.
#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    pub addrs: Vec<Multiaddr>,
    pub protocols: Vec<String>,
    pub public_key: Option<PublicKey>,
    pub agent_version: Option<String>,
}

/// Address book (all operations RwLock-protected, snapshots are cloned out).
#[derive(Debug, Default)]
pub struct AddressBook {
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add addresses for a peer. Returns how many were new.
    pub fn add_addrs(&self, peer_id: &PeerId, addrs: impl IntoIterator<Item = Multiaddr>) -> usize {
        let mut peers = self.peers.write();
        let record = peers.entry(*peer_id).or_default();
        let mut added = 0;
        for addr in addrs {
            let (transport, _) = split_p2p(&addr);
            if transport.is_empty() || record.addrs.contains(&transport) {
                continue;
            }
            record.addrs.push(transport);
            added += 1;
        }
        if added > 0 {
            trace!(%peer_id, added, total = record.addrs.len(), "Added peer addresses");
        }
        added
    }

    pub fn addrs(&self, peer_id: &PeerId) -> Vec<Multiaddr> {
        self.peers
            .read()
            .get(peer_id)
            .map(|r| r.addrs.clone())
            .unwrap_or_default()
    }

    /// Known addresses as a [`PeerAddrInfo`], or `None` if none are known.
    pub fn addr_info(&self, peer_id: &PeerId) -> Option<PeerAddrInfo> {
        let addrs = self.addrs(peer_id);
        (!addrs.is_empty()).then(|| PeerAddrInfo::new(*peer_id, addrs))
    }

    /// Replace the advertised protocol list.
    pub fn set_protocols(&self, peer_id: &PeerId, protocols: Vec<String>) {
        self.peers.write().entry(*peer_id).or_default().protocols = protocols;
    }

    /// Advertised protocols, or `None` if the peer is unknown.
    pub fn protocols(&self, peer_id: &PeerId) -> Option<Vec<String>> {
        self.peers.read().get(peer_id).map(|r| r.protocols.clone())
    }

    pub fn supports_protocol(&self, peer_id: &PeerId, protocol: &str) -> bool {
        self.peers
            .read()
            .get(peer_id)
            .is_some_and(|r| r.protocols.iter().any(|p| p == protocol))
    }

    /// Record a peer's public key. The key must hash to `peer_id`.
    pub fn set_public_key(&self, peer_id: &PeerId, key: PublicKey) -> Result<(), PeerstoreError> {
        let actual = key.to_peer_id();
        if actual != *peer_id {
            return Err(PeerstoreError::KeyMismatch {
                expected: *peer_id,
                actual,
            });
        }
        self.peers.write().entry(*peer_id).or_default().public_key = Some(key);
        Ok(())
    }

    pub fn public_key(&self, peer_id: &PeerId) -> Option<PublicKey> {
        self.peers
            .read()
            .get(peer_id)
            .and_then(|r| r.public_key.clone())
    }

    pub fn set_agent_version(&self, peer_id: &PeerId, agent_version: impl Into<String>) {
        self.peers.write().entry(*peer_id).or_default().agent_version = Some(agent_version.into());
    }

    pub fn agent_version(&self, peer_id: &PeerId) -> Option<String> {
        self.peers
            .read()
            .get(peer_id)
            .and_then(|r| r.agent_version.clone())
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.read().get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }

    pub fn remove(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.write().remove(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
