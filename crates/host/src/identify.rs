//! The identify exchange, run by `libp2p::identify` on every connection.
//!
//! Both sides ask. What the remote says about itself is copied into the
//! address book; the identify protocols themselves are left out of the
//! recorded protocol list.

use libp2p::StreamProtocol;
use libp2p::identify::{self, Info};
use peerscope_identity::{PeerId, PublicKey};
use peerscope_peerstore::AddressBook;
use tracing::{debug, warn};

use crate::{HostConfig, PROTOCOL_VERSION};

pub use libp2p::identify::{PROTOCOL_NAME as IDENTIFY_PROTOCOL, PUSH_PROTOCOL_NAME};

pub(crate) fn config(public_key: PublicKey, host: &HostConfig) -> identify::Config {
    identify::Config::new(PROTOCOL_VERSION.to_string(), public_key)
        .with_agent_version(host.agent_version.clone())
}

/// Protocols worth reporting, sorted.
pub fn advertised_protocols(protocols: &[StreamProtocol]) -> Vec<String> {
    let mut protocols: Vec<String> = protocols
        .iter()
        .filter(|p| **p != IDENTIFY_PROTOCOL && **p != PUSH_PROTOCOL_NAME)
        .map(|p| p.to_string())
        .collect();
    protocols.sort_unstable();
    protocols.dedup();
    protocols
}

/// Store what `peer_id` told us about itself.
pub(crate) fn record(book: &AddressBook, peer_id: &PeerId, info: &Info) {
    if let Err(e) = book.set_public_key(peer_id, info.public_key.clone()) {
        warn!(%peer_id, error = %e, "Rejected identify public key");
    }
    book.add_addrs(peer_id, info.listen_addrs.iter().cloned());
    let protocols = advertised_protocols(&info.protocols);
    debug!(
        %peer_id,
        agent = %info.agent_version,
        protocols = protocols.len(),
        listen_addrs = info.listen_addrs.len(),
        observed_addr = %info.observed_addr,
        "Identified peer"
    );
    book.set_protocols(peer_id, protocols);
    book.set_agent_version(peer_id, info.agent_version.clone());
}
