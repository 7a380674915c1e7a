//! Peer address information and overlay address parsing.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use libp2p::multiaddr::{self, Protocol};
use libp2p::{Multiaddr, PeerId};
use tracing::debug;

/// Errors from parsing overlay addresses and peer ids.
#[derive(Debug, thiserror::Error)]
pub enum AddrInfoError {
    #[error("invalid multiaddr: {0}")]
    InvalidMultiaddr(#[from] multiaddr::Error),

    #[error("address {0} has no trailing /p2p component")]
    MissingPeerId(Multiaddr),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(#[from] libp2p::identity::ParseError),
}

/// A peer identity together with the transport addresses it is reachable on.
///
/// Addresses are stored without their `/p2p` suffix and are deduplicated,
/// preserving first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddrInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerAddrInfo {
    pub fn new(peer_id: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) -> Self {
        let mut info = Self {
            peer_id,
            addrs: Vec::new(),
        };
        info.extend_addrs(addrs);
        info
    }

    /// Build from an overlay address such as `/ip4/1.2.3.4/tcp/4001/p2p/<id>`.
    ///
    /// A bare `/p2p/<id>` yields an info with no addresses.
    pub fn from_p2p_addr(addr: &Multiaddr) -> Result<Self, AddrInfoError> {
        match split_p2p(addr) {
            (transport, Some(peer_id)) => {
                let addrs = (!transport.is_empty()).then_some(transport);
                Ok(Self::new(peer_id, addrs))
            }
            (_, None) => Err(AddrInfoError::MissingPeerId(addr.clone())),
        }
    }

    /// Append addresses not already known, stripping any `/p2p` suffix.
    pub fn extend_addrs(&mut self, addrs: impl IntoIterator<Item = Multiaddr>) {
        for addr in addrs {
            let (transport, _) = split_p2p(&addr);
            if !transport.is_empty() && !self.addrs.contains(&transport) {
                self.addrs.push(transport);
            }
        }
    }

    /// Overlay addresses for this peer, one per transport address.
    pub fn to_p2p_addrs(&self) -> Vec<Multiaddr> {
        if self.addrs.is_empty() {
            return vec![Multiaddr::empty().with(Protocol::P2p(self.peer_id))];
        }
        self.addrs
            .iter()
            .map(|addr| addr.clone().with(Protocol::P2p(self.peer_id)))
            .collect()
    }

    /// Same identity and same address set, ignoring order.
    pub fn same_as(&self, other: &Self) -> bool {
        if self.peer_id != other.peer_id {
            return false;
        }
        let ours: HashSet<_> = self.addrs.iter().collect();
        let theirs: HashSet<_> = other.addrs.iter().collect();
        ours == theirs
    }
}

impl fmt::Display for PeerAddrInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: [", self.peer_id)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{addr}")?;
        }
        f.write_str("]}")
    }
}

impl FromStr for PeerAddrInfo {
    type Err = AddrInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: Multiaddr = s.parse()?;
        Self::from_p2p_addr(&addr)
    }
}

/// Split a trailing `/p2p/<id>` off an address.
pub fn split_p2p(addr: &Multiaddr) -> (Multiaddr, Option<PeerId>) {
    let mut transport = addr.clone();
    match transport.pop() {
        Some(Protocol::P2p(peer_id)) => (transport, Some(peer_id)),
        Some(other) => {
            transport.push(other);
            (transport, None)
        }
        None => (transport, None),
    }
}

/// Group overlay addresses by peer, skipping any without a `/p2p` component.
///
/// Output order follows the first appearance of each peer.
pub fn group_p2p_addrs<'a>(addrs: impl IntoIterator<Item = &'a Multiaddr>) -> Vec<PeerAddrInfo> {
    let mut grouped: Vec<PeerAddrInfo> = Vec::new();
    for addr in addrs {
        match PeerAddrInfo::from_p2p_addr(addr) {
            Ok(info) => match grouped.iter_mut().find(|g| g.peer_id == info.peer_id) {
                Some(existing) => existing.extend_addrs(info.addrs),
                None => grouped.push(info),
            },
            Err(e) => debug!(%addr, error = %e, "Skipping address without peer id"),
        }
    }
    grouped
}

/// Decode a bare peer id string.
pub fn parse_peer_id(s: &str) -> Result<PeerId, AddrInfoError> {
    Ok(s.trim().parse::<PeerId>()?)
}
