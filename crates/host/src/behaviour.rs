use std::convert::Infallible;
use std::sync::Arc;

use libp2p::swarm::NetworkBehaviour;
use libp2p::{StreamProtocol, connection_limits, identify};
use parking_lot::RwLock;
use peerscope_identity::PublicKey;
use peerscope_kad::KadConfig;

use crate::{HostConfig, HostConfigError, streams};

/// Everything the host runs on each connection.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "HostEvent")]
pub(crate) struct HostBehaviour {
    limits: connection_limits::Behaviour,
    pub(crate) identify: identify::Behaviour,
    pub(crate) streams: streams::Behaviour,
    pub(crate) kad: peerscope_kad::Behaviour,
}

impl HostBehaviour {
    pub(crate) fn new(
        public_key: PublicKey,
        config: &HostConfig,
        kad: KadConfig,
        protocols: Arc<RwLock<Vec<StreamProtocol>>>,
    ) -> Result<Self, HostConfigError> {
        let local = public_key.to_peer_id();
        // One multiplexed connection per peer.
        let limits = connection_limits::ConnectionLimits::default()
            .with_max_established_per_peer(Some(1));

        Ok(Self {
            limits: connection_limits::Behaviour::new(limits),
            identify: identify::Behaviour::new(crate::identify::config(public_key, config)),
            streams: streams::Behaviour::new(protocols, config.stream_timeout),
            kad: peerscope_kad::Behaviour::new(local, kad)?,
        })
    }
}

#[derive(Debug)]
pub(crate) enum HostEvent {
    Identify(Box<identify::Event>),
    Streams(streams::Event),
    Kad(peerscope_kad::Event),
}

impl From<Infallible> for HostEvent {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

impl From<identify::Event> for HostEvent {
    fn from(event: identify::Event) -> Self {
        Self::Identify(Box::new(event))
    }
}

impl From<streams::Event> for HostEvent {
    fn from(event: streams::Event) -> Self {
        Self::Streams(event)
    }
}

impl From<peerscope_kad::Event> for HostEvent {
    fn from(event: peerscope_kad::Event) -> Self {
        Self::Kad(event)
    }
}
