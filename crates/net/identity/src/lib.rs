//! Local identity and peer addressing.
//!
//! A probe run owns exactly one [`LocalIdentity`], generated fresh at startup.
//! Remote peers are described by [`PeerAddrInfo`], built either from an
//! overlay address (`/ip4/1.2.3.4/tcp/4001/p2p/<peer-id>`) or from a DHT
//! lookup.

mod addr_info;
mod keys;

pub use addr_info::{AddrInfoError, PeerAddrInfo, group_p2p_addrs, parse_peer_id, split_p2p};
pub use keys::{IdentityError, LocalIdentity};

pub use libp2p::identity::{DecodingError, Keypair, PublicKey, SigningError};
pub use libp2p::{Multiaddr, PeerId, multiaddr};
