use std::fmt;
use std::str::FromStr;

use peerscope_identity::{Multiaddr, PeerAddrInfo, PeerId, parse_peer_id};

use crate::TargetError;

/// What the user asked to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// An overlay address: the peer and a way to reach it.
    Addr(PeerAddrInfo),
    /// Only an identity; addresses must come from the DHT.
    Peer(PeerId),
}

impl ProbeTarget {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::Addr(info) => &info.peer_id,
            Self::Peer(peer_id) => peer_id,
        }
    }
}

impl FromStr for ProbeTarget {
    type Err = TargetError;

    /// Text that parses as a multiaddr must carry a `/p2p` suffix. Anything
    /// else is decoded as a bare peer id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.parse::<Multiaddr>() {
            Ok(addr) => PeerAddrInfo::from_p2p_addr(&addr)
                .map(Self::Addr)
                .map_err(TargetError::Address),
            Err(_) => parse_peer_id(s)
                .map(Self::Peer)
                .map_err(TargetError::PeerId),
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addr(info) => write!(f, "{info}"),
            Self::Peer(peer_id) => write!(f, "{peer_id}"),
        }
    }
}
