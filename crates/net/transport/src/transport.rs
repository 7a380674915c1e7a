use std::io;
use std::time::Duration;

use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::timeout::TransportTimeoutError;
use libp2p::core::transport::{Boxed, Transport};
use libp2p::core::upgrade::Version;
use libp2p::core::ConnectedPoint;
use libp2p::{dns, tcp, websocket};
use peerscope_identity::{Keypair, PeerId};
use tracing::{debug, warn};

use crate::log::UpgradeLog;
use crate::muxer::MuxerUpgrade;
use crate::registry::{MuxerRegistry, SecurityRegistry};
use crate::security::SecurityUpgrade;
use crate::RegistryError;

/// The upgraded transport handed to the swarm.
pub type PeerTransport = Boxed<(PeerId, StreamMuxerBox)>;

fn dns_tcp() -> dns::tokio::Transport<tcp::tokio::Transport> {
    let tcp = || tcp::tokio::Transport::new(tcp::Config::default());
    dns::tokio::Transport::system(tcp()).unwrap_or_else(|e| {
        warn!(error = %e, "System resolver configuration unavailable, using defaults");
        dns::tokio::Transport::custom(
            tcp(),
            dns::ResolverConfig::default(),
            dns::ResolverOpts::default(),
        )
    })
}

/// Build the dialing and listening stack: TCP and WebSocket over TCP, both
/// behind DNS resolution, upgraded with multistream-select V1 to the
/// registered security protocols and then the registered multiplexers.
///
/// Every dial, including the upgrades, must finish within `dial_timeout`.
/// The names negotiated for each connection are written to `log`.
pub fn build_transport(
    keypair: &Keypair,
    security: &SecurityRegistry,
    muxers: &MuxerRegistry,
    dial_timeout: Duration,
    log: UpgradeLog,
) -> Result<PeerTransport, RegistryError> {
    let security = SecurityUpgrade::new(security.build(keypair)?, log.clone());
    let muxers = muxers.build(keypair)?;
    debug!(
        security = ?security_names(&security),
        muxers = ?muxers,
        "Building transport"
    );

    let raw = websocket::Config::new(dns_tcp()).or_transport(dns_tcp());

    let transport = raw
        .upgrade(Version::V1)
        .authenticate(security)
        .multiplex_ext(move |peer: &PeerId, _: &ConnectedPoint| {
            MuxerUpgrade::new(muxers.clone(), *peer, log.clone())
        })
        .timeout(dial_timeout)
        .map(|(peer, muxer), _| (peer, StreamMuxerBox::new(muxer)))
        .map_err(|e| match e {
            TransportTimeoutError::Timeout => {
                io::Error::new(io::ErrorKind::TimedOut, "connection setup timed out")
            }
            TransportTimeoutError::TimerError(e) => e,
            TransportTimeoutError::Other(e) => io::Error::other(e),
        })
        .boxed();
    Ok(transport)
}

fn security_names(upgrade: &SecurityUpgrade) -> Vec<String> {
    use libp2p::core::upgrade::UpgradeInfo;
    upgrade.protocol_info().map(|c| c.name).collect()
}
