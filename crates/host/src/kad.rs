//! Handle to the DHT behaviour inside the host's swarm.

use peerscope_identity::{PeerAddrInfo, PeerId};
use peerscope_kad::{KadConfig, KadError};
use tracing::debug;

use crate::event_loop::Command;
use crate::{Host, HostError};

/// Kademlia peer routing over the host's connections.
#[derive(Clone, Debug)]
pub struct Kademlia {
    host: Host,
}

impl Kademlia {
    pub(crate) fn new(host: Host) -> Self {
        Self { host }
    }

    /// Protocol name used on the wire, e.g. `/ipfs/kad/1.0.0`.
    pub fn protocol(&self) -> String {
        self.config().protocol_name()
    }

    pub fn config(&self) -> &KadConfig {
        &self.host.inner.shared.kad
    }

    /// Add a peer to the routing table. Only addresses passing the routing
    /// table filter are kept; returns whether any were.
    pub async fn add_peer(&self, info: &PeerAddrInfo) -> Result<bool, HostError> {
        let info = info.clone();
        self.host
            .request(|reply| Command::AddKadPeer { info, reply })
            .await
    }

    /// Add every connected peer that advertised the DHT protocol, with the
    /// addresses in the address book. Returns how many were added.
    pub async fn refresh_from_host(&self) -> Result<usize, HostError> {
        let protocol = self.protocol();
        let book = self.host.address_book();
        let mut added = 0;
        for peer_id in self.host.connected_peers() {
            if !book.supports_protocol(&peer_id, &protocol) {
                continue;
            }
            let info = PeerAddrInfo::new(peer_id, book.addrs(&peer_id));
            if self.add_peer(&info).await? {
                added += 1;
            }
        }
        debug!(added, "Routing table refreshed from connections");
        Ok(added)
    }

    pub async fn routing_table_peers(&self) -> Result<Vec<PeerId>, HostError> {
        self.host
            .request(|reply| Command::RoutingTable { reply })
            .await
    }

    pub async fn routing_table_len(&self) -> Result<usize, HostError> {
        Ok(self.routing_table_peers().await?.len())
    }

    /// Find the addresses of `target`.
    ///
    /// A peer the host is connected to is answered from the address book.
    /// `Ok(None)` means the lookup reached peers but none knew the target.
    pub async fn find_peer(&self, target: &PeerId) -> Result<Option<PeerAddrInfo>, HostError> {
        let target = *target;
        if target == self.host.local_peer_id() {
            return Err(KadError::LookupSelf.into());
        }
        if self.host.is_connected(&target) {
            let addrs = self.host.address_book().addrs(&target);
            return Ok(Some(PeerAddrInfo::new(target, addrs)));
        }

        let result = self
            .host
            .request(|reply| Command::FindPeer { target, reply })
            .await?;
        Ok(result?)
    }
}
