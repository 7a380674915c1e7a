//! The task that owns the swarm.
//!
//! [`Host`](crate::Host) handles talk to it over a command channel; anything
//! they read without a round trip (connections, listen addresses, the
//! address book) lives in [`Shared`].

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use libp2p::core::ConnectedPoint;
use libp2p::core::transport::{ListenerId, TransportError};
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::{self, SwarmEvent};
use libp2p::{StreamProtocol, Swarm, identify};
use parking_lot::{Mutex, RwLock};
use peerscope_connmgr::ConnectionManager;
use peerscope_identity::{LocalIdentity, Multiaddr, PeerAddrInfo, PeerId};
use peerscope_kad::{KadConfig, LookupResult, QueryId};
use peerscope_peerstore::AddressBook;
use peerscope_transport::UpgradeLog;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::behaviour::{HostBehaviour, HostEvent};
use crate::streams::{self, OpenResult};
use crate::{ConnectionInfo, DialFailure, HostConfig, HostError, StreamHandler};

type Reply<T> = oneshot::Sender<T>;

/// State readable from any [`Host`](crate::Host) handle.
pub(crate) struct Shared {
    pub(crate) identity: LocalIdentity,
    pub(crate) config: HostConfig,
    pub(crate) kad: KadConfig,
    pub(crate) address_book: Arc<AddressBook>,
    pub(crate) conn_manager: Arc<ConnectionManager>,
    pub(crate) connections: Mutex<HashMap<PeerId, ConnectionInfo>>,
    pub(crate) handlers: RwLock<HashMap<String, Arc<dyn StreamHandler>>>,
    /// Protocols with a handler, sorted. Shared with every connection.
    pub(crate) protocols: Arc<RwLock<Vec<StreamProtocol>>>,
    pub(crate) listen_addrs: RwLock<Vec<Multiaddr>>,
    pub(crate) closed: AtomicBool,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub(crate) enum Command {
    Listen {
        addrs: Vec<Multiaddr>,
        reply: Reply<Result<Vec<Multiaddr>, HostError>>,
    },
    Connect {
        peer_id: PeerId,
        addrs: Vec<Multiaddr>,
        reply: Reply<Result<(), HostError>>,
    },
    /// Answered once identify with the peer has finished or failed, or the
    /// connection is gone.
    WaitIdentified { peer_id: PeerId, reply: Reply<()> },
    OpenStream {
        peer_id: PeerId,
        protocols: Vec<StreamProtocol>,
        reply: Reply<OpenResult>,
    },
    CloseConnection { peer_id: PeerId, reply: Reply<bool> },
    Close { reply: Reply<()> },
    AddKadPeer { info: PeerAddrInfo, reply: Reply<bool> },
    RoutingTable { reply: Reply<Vec<PeerId>> },
    FindPeer {
        target: PeerId,
        reply: Reply<LookupResult>,
    },
}

/// A `listen` call waiting for every listener to report an address.
struct PendingListen {
    listeners: Vec<(ListenerId, Multiaddr)>,
    bound: HashMap<ListenerId, Multiaddr>,
    reply: Reply<Result<Vec<Multiaddr>, HostError>>,
}

impl PendingListen {
    fn is_done(&self) -> bool {
        self.listeners.iter().all(|(id, _)| self.bound.contains_key(id))
    }
}

pub(crate) struct EventLoop {
    swarm: Swarm<HostBehaviour>,
    shared: Arc<Shared>,
    upgrade_log: UpgradeLog,
    commands: mpsc::UnboundedReceiver<Command>,
    listeners: HashSet<ListenerId>,
    pending_listens: Vec<PendingListen>,
    pending_dials: HashMap<PeerId, Vec<Reply<Result<(), HostError>>>>,
    identified: HashSet<PeerId>,
    identify_waiters: HashMap<PeerId, Vec<Reply<()>>>,
    close_waiters: HashMap<PeerId, Vec<Reply<bool>>>,
    lookups: HashMap<QueryId, Reply<LookupResult>>,
}

impl EventLoop {
    pub(crate) fn new(
        swarm: Swarm<HostBehaviour>,
        shared: Arc<Shared>,
        upgrade_log: UpgradeLog,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            swarm,
            shared,
            upgrade_log,
            commands,
            listeners: HashSet::new(),
            pending_listens: Vec::new(),
            pending_dials: HashMap::new(),
            identified: HashSet::new(),
            identify_waiters: HashMap::new(),
            close_waiters: HashMap::new(),
            lookups: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let conn_manager = self.shared.conn_manager.clone();
        let mut tick = tokio::time::interval(conn_manager.config().trim_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.on_swarm_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Close { reply }) => {
                        self.close();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => break,
                },
                _ = conn_manager.pressure() => self.trim(),
                _ = tick.tick() => self.trim(),
            }
        }
        debug!("Host event loop stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Listen { addrs, reply } => self.listen(addrs, reply),
            Command::Connect {
                peer_id,
                addrs,
                reply,
            } => self.connect(peer_id, addrs, reply),
            Command::WaitIdentified { peer_id, reply } => {
                if self.identified.contains(&peer_id) || !self.swarm.is_connected(&peer_id) {
                    let _ = reply.send(());
                } else {
                    self.identify_waiters.entry(peer_id).or_default().push(reply);
                }
            }
            Command::OpenStream {
                peer_id,
                protocols,
                reply,
            } => self
                .swarm
                .behaviour_mut()
                .streams
                .open(peer_id, protocols, reply),
            Command::CloseConnection { peer_id, reply } => {
                if self.swarm.disconnect_peer_id(peer_id).is_ok() {
                    self.close_waiters.entry(peer_id).or_default().push(reply);
                } else {
                    let _ = reply.send(false);
                }
            }
            Command::Close { reply } => {
                self.close();
                let _ = reply.send(());
            }
            Command::AddKadPeer { info, reply } => {
                let _ = reply.send(self.swarm.behaviour_mut().kad.add_peer(&info));
            }
            Command::RoutingTable { reply } => {
                let _ = reply.send(self.swarm.behaviour_mut().kad.routing_table_peers());
            }
            Command::FindPeer { target, reply } => {
                match self.swarm.behaviour_mut().kad.find_peer(target) {
                    Ok(id) => {
                        self.lookups.insert(id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    }

    /// All or nothing: a listener that fails to open, or closes before it
    /// reports an address, takes the others of the same call down with it.
    fn listen(&mut self, addrs: Vec<Multiaddr>, reply: Reply<Result<Vec<Multiaddr>, HostError>>) {
        let mut opened = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match self.swarm.listen_on(addr.clone()) {
                Ok(id) => {
                    self.listeners.insert(id);
                    opened.push((id, addr));
                }
                Err(e) => {
                    warn!(%addr, error = %e, released = opened.len(), "Failed to listen");
                    for (id, _) in opened {
                        self.remove_listener(id);
                    }
                    let _ = reply.send(Err(HostError::Listen {
                        addr,
                        source: listen_error(e),
                    }));
                    return;
                }
            }
        }

        if opened.is_empty() {
            let _ = reply.send(Ok(Vec::new()));
            return;
        }
        self.pending_listens.push(PendingListen {
            listeners: opened,
            bound: HashMap::new(),
            reply,
        });
    }

    fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
        self.swarm.remove_listener(id);
    }

    fn on_listen_addr(&mut self, listener_id: ListenerId, address: Multiaddr) {
        // Released by a failed `listen` before it got this far.
        if !self.listeners.contains(&listener_id) {
            return;
        }
        info!(addr = %address, "Listening");
        self.shared.listen_addrs.write().push(address.clone());

        let Some(index) = self
            .pending_listens
            .iter()
            .position(|p| p.listeners.iter().any(|(id, _)| *id == listener_id))
        else {
            return;
        };
        let Some(pending) = self.pending_listens.get_mut(index) else {
            return;
        };
        pending.bound.entry(listener_id).or_insert(address);
        if pending.is_done() {
            let mut pending = self.pending_listens.swap_remove(index);
            let bound = pending
                .listeners
                .iter()
                .filter_map(|(id, _)| pending.bound.remove(id))
                .collect();
            let _ = pending.reply.send(Ok(bound));
        }
    }

    fn on_listener_closed(
        &mut self,
        listener_id: ListenerId,
        addresses: &[Multiaddr],
        error: io::Error,
    ) {
        self.listeners.remove(&listener_id);
        self.shared
            .listen_addrs
            .write()
            .retain(|a| !addresses.contains(a));

        let Some(index) = self
            .pending_listens
            .iter()
            .position(|p| p.listeners.iter().any(|(id, _)| *id == listener_id))
        else {
            debug!(%error, "Listener closed");
            return;
        };
        let pending = self.pending_listens.swap_remove(index);
        let mut failed = Multiaddr::empty();
        for (id, addr) in pending.listeners {
            if id == listener_id {
                failed = addr;
            } else {
                self.remove_listener(id);
            }
        }
        let released: Vec<Multiaddr> = pending.bound.into_values().collect();
        self.shared
            .listen_addrs
            .write()
            .retain(|a| !released.contains(a));
        warn!(addr = %failed, %error, "Listener closed before binding");
        let _ = pending.reply.send(Err(HostError::Listen {
            addr: failed,
            source: error,
        }));
    }

    fn connect(
        &mut self,
        peer_id: PeerId,
        addrs: Vec<Multiaddr>,
        reply: Reply<Result<(), HostError>>,
    ) {
        if self.swarm.is_connected(&peer_id) {
            trace!(%peer_id, "Already connected");
            let _ = reply.send(Ok(()));
            return;
        }
        let book = &self.shared.address_book;
        book.add_addrs(&peer_id, addrs);

        if let Some(waiters) = self.pending_dials.get_mut(&peer_id) {
            waiters.push(reply);
            return;
        }
        let candidates = book.addrs(&peer_id);
        if candidates.is_empty() {
            let _ = reply.send(Err(HostError::NoReachableAddress {
                peer_id,
                attempts: Vec::new(),
            }));
            return;
        }

        debug!(%peer_id, candidates = candidates.len(), "Dialing peer");
        let opts = DialOpts::peer_id(peer_id)
            .addresses(candidates)
            .condition(PeerCondition::DisconnectedAndNotDialing)
            .build();
        match self.swarm.dial(opts) {
            Ok(()) => {
                self.pending_dials.insert(peer_id, vec![reply]);
            }
            // Someone else is already dialing; wait for that attempt.
            Err(swarm::DialError::DialPeerConditionFalse(_)) => {
                self.pending_dials.insert(peer_id, vec![reply]);
            }
            Err(e) => {
                let _ = reply.send(Err(HostError::from_attempts(
                    peer_id,
                    DialFailure::from_swarm(e),
                )));
            }
        }
    }

    fn on_swarm_event(&mut self, event: SwarmEvent<HostEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => self.on_behaviour_event(event),
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                let negotiated = self.upgrade_log.take(&peer_id);
                let info = ConnectionInfo::new(
                    connection_id,
                    peer_id,
                    &endpoint,
                    negotiated.security.unwrap_or_default(),
                    negotiated.muxer.unwrap_or_default(),
                );
                if let ConnectedPoint::Dialer { address, .. } = &endpoint {
                    self.shared.address_book.add_addrs(&peer_id, [address.clone()]);
                }
                info!(
                    %peer_id,
                    id = %connection_id,
                    direction = %info.direction,
                    addr = %info.remote_addr,
                    security = %info.security_protocol,
                    muxer = %info.muxer_protocol,
                    "Connection established"
                );
                self.shared.connections.lock().insert(peer_id, info);
                self.shared.conn_manager.track(peer_id);
                for reply in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(Ok(()));
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                connection_id,
                num_established,
                cause,
                ..
            } => {
                debug!(%peer_id, id = %connection_id, cause = ?cause, "Connection closed");
                if num_established > 0 {
                    return;
                }
                self.shared.connections.lock().remove(&peer_id);
                self.shared.conn_manager.untrack(&peer_id);
                self.identified.remove(&peer_id);
                for reply in self.identify_waiters.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(());
                }
                for reply in self.close_waiters.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(true);
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => self.on_dial_error(peer_id, error),
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => self.on_listen_addr(listener_id, address),
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                debug!(addr = %address, "Listen address expired");
                self.shared.listen_addrs.write().retain(|a| *a != address);
            }
            SwarmEvent::ListenerClosed {
                listener_id,
                addresses,
                reason,
            } => {
                let error = match reason {
                    Ok(()) => io::Error::other("listener closed"),
                    Err(e) => e,
                };
                self.on_listener_closed(listener_id, &addresses, error);
            }
            SwarmEvent::ListenerError { error, .. } => warn!(%error, "Listener error"),
            SwarmEvent::IncomingConnectionError {
                send_back_addr,
                error,
                ..
            } => debug!(remote = %send_back_addr, %error, "Inbound connection failed"),
            other => trace!(event = ?other, "Swarm event"),
        }
    }

    fn on_dial_error(&mut self, peer_id: PeerId, error: swarm::DialError) {
        let Some(waiters) = self.pending_dials.remove(&peer_id) else {
            debug!(%peer_id, %error, "Dial failed");
            return;
        };
        // Lost a race against an inbound connection, or another dial.
        if self.swarm.is_connected(&peer_id) {
            for reply in waiters {
                let _ = reply.send(Ok(()));
            }
            return;
        }

        let attempts = DialFailure::from_swarm(error);
        for failure in &attempts {
            debug!(%peer_id, addr = %failure.addr, error = %failure.error, "Dial attempt failed");
        }
        let mut waiters = waiters.into_iter();
        let first = waiters.next();
        for reply in waiters {
            let copy = attempts.iter().map(DialFailure::duplicate).collect();
            let _ = reply.send(Err(HostError::from_attempts(peer_id, copy)));
        }
        if let Some(reply) = first {
            let _ = reply.send(Err(HostError::from_attempts(peer_id, attempts)));
        }
    }

    fn on_behaviour_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Identify(event) => self.on_identify_event(*event),
            HostEvent::Streams(streams::Event::Inbound {
                peer,
                protocol,
                stream,
            }) => {
                self.shared.conn_manager.touch(&peer);
                let handler = self.shared.handlers.read().get(protocol.as_ref()).cloned();
                match handler {
                    Some(handler) => {
                        trace!(%peer, %protocol, "Dispatching inbound stream");
                        tokio::spawn(async move { handler.handle(peer, stream).await });
                    }
                    None => debug!(%peer, %protocol, "Handler removed during negotiation"),
                }
            }
            HostEvent::Kad(peerscope_kad::Event::Lookup { id, result }) => {
                if let Some(reply) = self.lookups.remove(&id) {
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn on_identify_event(&mut self, event: identify::Event) {
        let peer_id = match event {
            identify::Event::Received { peer_id, info, .. } => {
                crate::identify::record(&self.shared.address_book, &peer_id, &info);
                self.identified.insert(peer_id);
                peer_id
            }
            identify::Event::Error { peer_id, error, .. } => {
                warn!(%peer_id, %error, "Identify failed");
                peer_id
            }
            other => {
                trace!(event = ?other, "Identify event");
                return;
            }
        };
        for reply in self.identify_waiters.remove(&peer_id).unwrap_or_default() {
            let _ = reply.send(());
        }
    }

    /// Close connections chosen by the connection manager.
    fn trim(&mut self) {
        let victims = self.shared.conn_manager.trim();
        if victims.is_empty() {
            return;
        }
        info!(
            trimmed = victims.len(),
            remaining = self.shared.conn_manager.connection_count(),
            "Trimming connections"
        );
        for peer_id in victims {
            let _ = self.swarm.disconnect_peer_id(peer_id);
        }
    }

    fn close(&mut self) {
        let listeners: Vec<ListenerId> = self.listeners.drain().collect();
        for id in listeners {
            self.swarm.remove_listener(id);
        }
        self.shared.listen_addrs.write().clear();

        let connections: Vec<PeerId> =
            self.shared.connections.lock().drain().map(|(p, _)| p).collect();
        for peer_id in &connections {
            self.shared.conn_manager.untrack(peer_id);
            let _ = self.swarm.disconnect_peer_id(*peer_id);
        }
        for (_, waiters) in self.pending_dials.drain() {
            for reply in waiters {
                let _ = reply.send(Err(HostError::Closed));
            }
        }
        info!(closed = connections.len(), "Host closed");
    }
}

fn listen_error(e: TransportError<io::Error>) -> io::Error {
    match e {
        TransportError::MultiaddrNotSupported(addr) => io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no transport for {addr}"),
        ),
        TransportError::Other(e) => e,
    }
}
