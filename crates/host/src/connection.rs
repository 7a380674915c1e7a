use std::fmt;
use std::time::Duration;

use libp2p::core::ConnectedPoint;
pub use libp2p::swarm::ConnectionId;
use peerscope_identity::{Multiaddr, PeerId, split_p2p};
use web_time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        })
    }
}

/// What the host knows about one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_id: PeerId,
    pub remote_addr: Multiaddr,
    pub direction: Direction,
    pub security_protocol: String,
    pub muxer_protocol: String,
    pub established_at: Instant,
}

impl ConnectionInfo {
    pub(crate) fn new(
        id: ConnectionId,
        peer_id: PeerId,
        endpoint: &ConnectedPoint,
        security_protocol: String,
        muxer_protocol: String,
    ) -> Self {
        let (remote_addr, direction) = match endpoint {
            ConnectedPoint::Dialer { address, .. } => (address, Direction::Outbound),
            ConnectedPoint::Listener { send_back_addr, .. } => (send_back_addr, Direction::Inbound),
        };
        Self {
            id,
            peer_id,
            remote_addr: split_p2p(remote_addr).0,
            direction,
            security_protocol,
            muxer_protocol,
            established_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }
}
