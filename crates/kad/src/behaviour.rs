//! Kademlia peer routing on top of `libp2p::kad`.
//!
//! Only closest-peer lookups are used: enough to turn a bare peer id into
//! addresses. A lookup ends as soon as the swarm is about to dial the target
//! with addresses learned from the walk, so a target that does not speak
//! kad itself is still found.

use std::collections::{HashMap, VecDeque};
use std::task::{Context, Poll};

use libp2p::core::transport::PortUse;
use libp2p::core::Endpoint;
use libp2p::kad::store::MemoryStore;
use libp2p::kad::{
    self, GetClosestPeersError, GetClosestPeersOk, QueryId, QueryResult, QueryStats,
    RoutingUpdate,
};
use libp2p::swarm::{
    ConnectionDenied, ConnectionId, FromSwarm, NetworkBehaviour, THandler, THandlerInEvent,
    THandlerOutEvent, ToSwarm,
};
use peerscope_identity::{Multiaddr, PeerAddrInfo, PeerId};
use tracing::{debug, info, trace};

use crate::{KadConfig, KadError};

/// Outcome of a lookup: `Ok(None)` means at least one peer answered and
/// nobody knew the target.
pub type LookupResult = Result<Option<PeerAddrInfo>, KadError>;

#[derive(Debug)]
pub enum Event {
    Lookup { id: QueryId, result: LookupResult },
}

pub struct Behaviour {
    inner: kad::Behaviour<MemoryStore>,
    config: KadConfig,
    local: PeerId,
    /// Active lookups by query, with their target.
    lookups: HashMap<QueryId, PeerId>,
    events: VecDeque<Event>,
}

impl Behaviour {
    pub fn new(local: PeerId, config: KadConfig) -> Result<Self, KadError> {
        let mut inner =
            kad::Behaviour::with_config(local, MemoryStore::new(local), config.to_libp2p()?);
        inner.set_mode(Some(config.mode.into()));
        info!(mode = %config.mode, protocol = %config.protocol_name(), "DHT started");

        Ok(Self {
            inner,
            config,
            local,
            lookups: HashMap::new(),
            events: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &KadConfig {
        &self.config
    }

    /// Insert a peer with the addresses that pass the routing table filter.
    pub fn add_peer(&mut self, info: &PeerAddrInfo) -> bool {
        if info.peer_id == self.local {
            return false;
        }
        let addrs = self
            .config
            .routing_table_filter
            .apply(info.addrs.iter().cloned());
        if addrs.is_empty() {
            trace!(peer_id = %info.peer_id, "No routable addresses, not adding peer");
            return false;
        }

        let mut added = false;
        for addr in addrs {
            match self.inner.add_address(&info.peer_id, addr) {
                RoutingUpdate::Success => added = true,
                RoutingUpdate::Pending | RoutingUpdate::Failed => {}
            }
        }
        added
    }

    pub fn routing_table_peers(&mut self) -> Vec<PeerId> {
        let mut peers = Vec::new();
        for bucket in self.inner.kbuckets() {
            for entry in bucket.iter() {
                peers.push(*entry.node.key.preimage());
            }
        }
        peers
    }

    pub fn routing_table_len(&mut self) -> usize {
        self.inner.kbuckets().map(|b| b.num_entries()).sum()
    }

    /// Start a lookup for `target`. The answer arrives as [`Event::Lookup`].
    pub fn find_peer(&mut self, target: PeerId) -> Result<QueryId, KadError> {
        if target == self.local {
            return Err(KadError::LookupSelf);
        }
        let known = self.routing_table_len();
        if known == 0 {
            return Err(KadError::NoKnownPeers);
        }

        let id = self.inner.get_closest_peers(target);
        self.lookups.insert(id, target);
        debug!(%target, ?id, known, "Starting lookup");
        Ok(id)
    }

    fn on_kad_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::OutboundQueryProgressed {
                id,
                result: QueryResult::GetClosestPeers(result),
                stats,
                step,
            } => {
                if !step.last {
                    return;
                }
                let Some(target) = self.lookups.remove(&id) else {
                    return;
                };
                let result = self.lookup_result(target, result, &stats);
                self.events.push_back(Event::Lookup { id, result });
            }
            kad::Event::RoutablePeer { peer, address } => {
                if self.config.routing_table_filter.allows(&address) {
                    debug!(%peer, %address, "Adding kad peer to routing table");
                    self.inner.add_address(&peer, address);
                } else {
                    trace!(%peer, %address, "Kad peer address filtered");
                }
            }
            kad::Event::RoutingUpdated { peer, is_new_peer, .. } => {
                trace!(%peer, is_new_peer, "Routing table updated");
            }
            other => trace!(event = ?other, "Kad event"),
        }
    }

    fn lookup_result(
        &self,
        target: PeerId,
        result: Result<GetClosestPeersOk, GetClosestPeersError>,
        stats: &QueryStats,
    ) -> LookupResult {
        let (peers, timed_out) = match result {
            Ok(ok) => (ok.peers, false),
            Err(GetClosestPeersError::Timeout { peers, .. }) => (peers, true),
        };

        if let Some(found) = peers.into_iter().find(|p| p.peer_id == target) {
            let addrs = self.config.query_filter.apply(found.addrs);
            if !addrs.is_empty() {
                debug!(%target, addrs = addrs.len(), "Found peer");
                return Ok(Some(PeerAddrInfo::new(target, addrs)));
            }
        }

        let successes = stats.num_successes();
        if successes > 0 {
            debug!(%target, successes, timed_out, "Lookup ended without finding target");
            return Ok(None);
        }
        if timed_out {
            return Err(KadError::Timeout(self.config.lookup_timeout));
        }
        Err(KadError::AllQueriesFailed {
            failed: stats.num_failures() as usize,
        })
    }

    /// The swarm is about to dial `peer`. If it is the target of a lookup
    /// and the walk produced addresses for it, the lookup is done.
    fn on_dial(&mut self, peer: PeerId, addrs: &[Multiaddr]) {
        if addrs.is_empty() {
            return;
        }
        let done: Vec<QueryId> = self
            .lookups
            .iter()
            .filter(|(_, target)| **target == peer)
            .map(|(id, _)| *id)
            .collect();

        for id in done {
            self.lookups.remove(&id);
            if let Some(mut query) = self.inner.query_mut(&id) {
                query.finish();
            }
            debug!(target = %peer, addrs = addrs.len(), "Found peer while dialing it");
            self.events.push_back(Event::Lookup {
                id,
                result: Ok(Some(PeerAddrInfo::new(peer, addrs.to_vec()))),
            });
        }
    }
}

impl NetworkBehaviour for Behaviour {
    type ConnectionHandler = <kad::Behaviour<MemoryStore> as NetworkBehaviour>::ConnectionHandler;
    type ToSwarm = Event;

    fn handle_pending_inbound_connection(
        &mut self,
        connection_id: ConnectionId,
        local_addr: &Multiaddr,
        remote_addr: &Multiaddr,
    ) -> Result<(), ConnectionDenied> {
        self.inner
            .handle_pending_inbound_connection(connection_id, local_addr, remote_addr)
    }

    fn handle_established_inbound_connection(
        &mut self,
        connection_id: ConnectionId,
        peer: PeerId,
        local_addr: &Multiaddr,
        remote_addr: &Multiaddr,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        self.inner.handle_established_inbound_connection(
            connection_id,
            peer,
            local_addr,
            remote_addr,
        )
    }

    fn handle_pending_outbound_connection(
        &mut self,
        connection_id: ConnectionId,
        maybe_peer: Option<PeerId>,
        addresses: &[Multiaddr],
        effective_role: Endpoint,
    ) -> Result<Vec<Multiaddr>, ConnectionDenied> {
        let learned = self.inner.handle_pending_outbound_connection(
            connection_id,
            maybe_peer,
            addresses,
            effective_role,
        )?;
        let learned = self.config.query_filter.apply(learned);
        if let Some(peer) = maybe_peer {
            self.on_dial(peer, &learned);
        }
        Ok(learned)
    }

    fn handle_established_outbound_connection(
        &mut self,
        connection_id: ConnectionId,
        peer: PeerId,
        addr: &Multiaddr,
        role_override: Endpoint,
        port_use: PortUse,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        self.inner.handle_established_outbound_connection(
            connection_id,
            peer,
            addr,
            role_override,
            port_use,
        )
    }

    fn on_swarm_event(&mut self, event: FromSwarm) {
        self.inner.on_swarm_event(event);
    }

    fn on_connection_handler_event(
        &mut self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        event: THandlerOutEvent<Self>,
    ) {
        self.inner
            .on_connection_handler_event(peer_id, connection_id, event);
    }

    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<ToSwarm<Self::ToSwarm, THandlerInEvent<Self>>> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Poll::Ready(ToSwarm::GenerateEvent(event));
            }
            match self.inner.poll(cx) {
                Poll::Ready(ToSwarm::GenerateEvent(event)) => self.on_kad_event(event),
                Poll::Ready(action) => {
                    return Poll::Ready(
                        action.map_out(|_| unreachable!("kad events are consumed above")),
                    );
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
