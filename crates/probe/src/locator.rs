//! Turning a bare peer id into addresses through the DHT.

use futures::future::join_all;
use peerscope_dnsaddr::{DnsaddrResolver, is_dnsaddr};
use peerscope_host::Host;
use peerscope_identity::{Multiaddr, PeerAddrInfo, PeerId, group_p2p_addrs};
use tracing::{debug, info, warn};

use crate::{BootstrapConfig, LocatorError, ProbeEvent, ProbeObserver};

/// Protection tag held by bootstrap connections while a lookup runs.
pub const BOOTSTRAP_TAG: &str = "bootstrap-peer";

/// Result of connecting to the seed peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// Seeds that are now connected, in seed order.
    pub connected: Vec<PeerId>,
    /// Seeds that could not be reached.
    pub failed: usize,
}

impl BootstrapOutcome {
    pub fn attempted(&self) -> usize {
        self.connected.len() + self.failed
    }
}

/// Finds peers by id: bootstrap against seeds, then a Kademlia lookup.
#[derive(Clone)]
pub struct PeerLocator {
    host: Host,
    bootstrap: BootstrapConfig,
    resolver: Option<DnsaddrResolver>,
}

impl std::fmt::Debug for PeerLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLocator")
            .field("local", &self.host.local_peer_id())
            .field("seeds", &self.bootstrap.seeds.len())
            .finish()
    }
}

impl PeerLocator {
    pub fn new(host: Host, bootstrap: BootstrapConfig) -> Self {
        Self {
            host,
            bootstrap,
            resolver: None,
        }
    }

    /// Use `resolver` for `/dnsaddr` seeds instead of the system resolver.
    pub fn with_resolver(mut self, resolver: DnsaddrResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Connect to every seed in parallel.
    ///
    /// Failures are logged and counted; connected seeds are protected with
    /// [`BOOTSTRAP_TAG`] so the connection manager keeps them.
    pub async fn bootstrap(&self, seeds: &[Multiaddr]) -> BootstrapOutcome {
        let resolved = self.resolve_seeds(seeds).await;
        let local = self.host.local_peer_id();
        let peers: Vec<PeerAddrInfo> = group_p2p_addrs(&resolved)
            .into_iter()
            .filter(|info| info.peer_id != local)
            .collect();

        let timeout = self.bootstrap.connect_timeout;
        let attempts = peers.iter().map(|info| async move {
            let result = self.host.connect_with_timeout(info, timeout).await;
            (info.peer_id, result)
        });

        let mut outcome = BootstrapOutcome::default();
        for (peer_id, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    self.host.conn_manager().protect(peer_id, BOOTSTRAP_TAG);
                    outcome.connected.push(peer_id);
                }
                Err(e) => {
                    warn!(%peer_id, error = %e, "Failed to connect to bootstrap peer");
                    outcome.failed += 1;
                }
            }
        }
        info!(
            connected = outcome.connected.len(),
            failed = outcome.failed,
            "Bootstrap finished"
        );
        outcome
    }

    async fn resolve_seeds(&self, seeds: &[Multiaddr]) -> Vec<Multiaddr> {
        if !self.bootstrap.resolve_dnsaddr || !seeds.iter().any(is_dnsaddr) {
            return seeds.to_vec();
        }
        match &self.resolver {
            Some(resolver) => resolver.resolve_all(seeds).await,
            None => DnsaddrResolver::default().resolve_all(seeds).await,
        }
    }

    /// Look `target` up through the DHT, seeded from the current connections.
    pub async fn find_peer(&self, target: &PeerId) -> Result<PeerAddrInfo, LocatorError> {
        let kad = self.host.kad();
        let seeded = kad.refresh_from_host().await.map_err(LocatorError::from_host)?;
        debug!(%target, seeded, "Routing table seeded from connections");

        match kad.find_peer(target).await.map_err(LocatorError::from_host)? {
            Some(info) => Ok(info),
            None => Err(LocatorError::NotFound(*target)),
        }
    }

    /// Bootstrap, then look `target` up. Bootstrap protection is dropped once
    /// the lookup ends, whatever its result.
    pub async fn locate(
        &self,
        target: &PeerId,
        observer: &dyn ProbeObserver,
    ) -> Result<PeerAddrInfo, LocatorError> {
        let seeds = &self.bootstrap.seeds;
        if seeds.is_empty() {
            return Err(LocatorError::NoBootstrapPeers { attempted: 0 });
        }

        observer.on_event(&ProbeEvent::Bootstrapping);
        let outcome = self.bootstrap(seeds).await;
        if outcome.connected.is_empty() {
            return Err(LocatorError::NoBootstrapPeers {
                attempted: outcome.attempted(),
            });
        }

        observer.on_event(&ProbeEvent::StartingDht);
        let result = self.find_peer(target).await;

        let conn_manager = self.host.conn_manager();
        for peer_id in &outcome.connected {
            conn_manager.unprotect(peer_id, BOOTSTRAP_TAG);
        }
        result
    }
}
