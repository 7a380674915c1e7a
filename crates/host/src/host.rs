use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use libp2p::{Stream, StreamProtocol, Swarm, swarm};
use parking_lot::{Mutex, RwLock};
use peerscope_connmgr::ConnectionManager;
use peerscope_identity::{LocalIdentity, Multiaddr, PeerAddrInfo, PeerId};
use peerscope_kad::KadConfig;
use peerscope_peerstore::AddressBook;
use peerscope_transport::{
    MuxerRegistry, SecurityRegistry, UpgradeLog, build_transport, default_muxers,
    default_security,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::behaviour::HostBehaviour;
use crate::event_loop::{Command, EventLoop, Shared};
use crate::identify::IDENTIFY_PROTOCOL;
use crate::kad::Kademlia;
use crate::{ConnectionInfo, HostConfig, HostConfigError, HostError, StreamHandler};

/// Builds a [`Host`].
pub struct HostBuilder {
    identity: LocalIdentity,
    config: HostConfig,
    security: Option<SecurityRegistry>,
    muxers: Option<MuxerRegistry>,
    kad: KadConfig,
}

impl HostBuilder {
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            identity,
            config: HostConfig::default(),
            security: None,
            muxers: None,
            kad: KadConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default security protocols. Order is preference order.
    pub fn with_security(mut self, security: SecurityRegistry) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_muxers(mut self, muxers: MuxerRegistry) -> Self {
        self.muxers = Some(muxers);
        self
    }

    /// DHT settings. Client mode on `/ipfs/kad/1.0.0` unless set.
    pub fn with_kad(mut self, kad: KadConfig) -> Self {
        self.kad = kad;
        self
    }

    /// Validate the configuration and start the host's event loop.
    ///
    /// Must be called from within a tokio runtime. Call [`Host::listen`] to
    /// accept inbound connections.
    pub fn build(self) -> Result<Host, HostError> {
        let Self {
            identity,
            config,
            security,
            muxers,
            kad,
        } = self;
        config.validate()?;

        let security = security.unwrap_or_else(default_security);
        let muxers = muxers.unwrap_or_else(default_muxers);
        debug!(
            peer_id = %identity.peer_id(),
            security = ?security.names(),
            muxers = ?muxers.names(),
            kad = %kad.protocol_name(),
            "Building host"
        );

        let upgrade_log = UpgradeLog::new();
        let transport = build_transport(
            identity.keypair(),
            &security,
            &muxers,
            config.dial_timeout,
            upgrade_log.clone(),
        )
        .map_err(HostConfigError::from)?;
        let conn_manager = Arc::new(
            ConnectionManager::new(config.conn_manager.clone()).map_err(HostConfigError::from)?,
        );
        let protocols = Arc::new(RwLock::new(Vec::new()));
        let behaviour =
            HostBehaviour::new(identity.public_key(), &config, kad.clone(), protocols.clone())?;
        let swarm = Swarm::new(
            transport,
            behaviour,
            identity.peer_id(),
            swarm::Config::with_tokio_executor()
                .with_dial_concurrency_factor(config.dial_concurrency_factor()?),
        );

        let shared = Arc::new(Shared {
            identity,
            config,
            kad,
            address_book: Arc::new(AddressBook::new()),
            conn_manager,
            connections: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            protocols,
            listen_addrs: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(EventLoop::new(swarm, shared.clone(), upgrade_log, receiver).run());

        Ok(Host {
            inner: Arc::new(HostInner {
                shared,
                commands,
                task: Mutex::new(Some(task)),
            }),
        })
    }
}

/// A peer-to-peer host: dials, listens, and serves protocol handlers.
///
/// Cheap to clone. Dropping the last handle stops the event loop and with it
/// every connection and listener.
#[derive(Clone)]
pub struct Host {
    pub(crate) inner: Arc<HostInner>,
}

pub(crate) struct HostInner {
    pub(crate) shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HostInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("peer_id", &self.local_peer_id())
            .field("connections", &self.inner.shared.connections.lock().len())
            .finish_non_exhaustive()
    }
}

/// A handle that does not keep the host alive.
#[derive(Clone)]
pub struct WeakHost {
    inner: Weak<HostInner>,
}

impl WeakHost {
    pub fn upgrade(&self) -> Option<Host> {
        self.inner.upgrade().map(|inner| Host { inner })
    }
}

impl Host {
    pub fn builder(identity: LocalIdentity) -> HostBuilder {
        HostBuilder::new(identity)
    }

    /// For stream handlers that need to reach back into the host: a handler
    /// holding a strong [`Host`] would keep it alive forever.
    pub fn downgrade(&self) -> WeakHost {
        WeakHost {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.inner.shared.identity.peer_id()
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.shared.config
    }

    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.inner.shared.address_book
    }

    pub fn conn_manager(&self) -> &Arc<ConnectionManager> {
        &self.inner.shared.conn_manager
    }

    /// The DHT client running on this host.
    pub fn kad(&self) -> Kademlia {
        Kademlia::new(self.clone())
    }

    /// Bound listen addresses.
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.inner.shared.listen_addrs.read().clone()
    }

    /// Send `command` to the event loop and wait for its answer.
    pub(crate) async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HostError> {
        if self.is_closed() {
            return Err(HostError::Closed);
        }
        let (reply, answer) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply))
            .map_err(|_| HostError::Closed)?;
        answer.await.map_err(|_| HostError::Closed)
    }

    /// Bind every address in `addrs`.
    ///
    /// All or nothing: if one bind fails, the listeners already opened by this
    /// call are released before the error is returned.
    pub async fn listen(&self, addrs: &[Multiaddr]) -> Result<Vec<Multiaddr>, HostError> {
        let addrs = addrs.to_vec();
        self.request(|reply| Command::Listen { addrs, reply })
            .await?
    }

    /// Connect to a peer using the host's default connect timeout.
    pub async fn connect(&self, info: &PeerAddrInfo) -> Result<(), HostError> {
        self.connect_with_timeout(info, self.config().connect_timeout)
            .await
    }

    /// Ensure a multiplexed connection to `info.peer_id` exists.
    ///
    /// Returns immediately if one does. Otherwise the known and supplied
    /// addresses are dialed concurrently and the first to finish the upgrade
    /// wins. Waits up to the identify timeout for the identify exchange; its
    /// failure is only logged.
    pub async fn connect_with_timeout(
        &self,
        info: &PeerAddrInfo,
        deadline: Duration,
    ) -> Result<(), HostError> {
        let peer_id = info.peer_id;
        if peer_id == self.local_peer_id() {
            return Err(HostError::DialSelf);
        }

        let addrs = info.addrs.clone();
        let dialed = tokio::time::timeout(
            deadline,
            self.request(|reply| Command::Connect {
                peer_id,
                addrs,
                reply,
            }),
        )
        .await;
        match dialed {
            Ok(result) => result??,
            Err(_) => {
                debug!(%peer_id, ?deadline, "Connect deadline passed");
                return Err(HostError::NoReachableAddress {
                    peer_id,
                    attempts: Vec::new(),
                });
            }
        }

        let timeout = self.config().identify_timeout;
        let identified = tokio::time::timeout(
            timeout,
            self.request(|reply| Command::WaitIdentified { peer_id, reply }),
        )
        .await;
        match identified {
            Ok(result) => result?,
            Err(_) => warn!(%peer_id, ?timeout, "Identify did not finish in time"),
        }
        Ok(())
    }

    /// Protocols the peer advertised through identify.
    pub fn protocols(&self, peer_id: &PeerId) -> Result<Vec<String>, HostError> {
        if !self.is_connected(peer_id) {
            return Err(HostError::NotConnected(*peer_id));
        }
        Ok(self.address_book().protocols(peer_id).unwrap_or_default())
    }

    /// Open a substream to a connected peer and negotiate one of `protocols`,
    /// in preference order.
    pub async fn new_stream(
        &self,
        peer_id: &PeerId,
        protocols: &[&str],
    ) -> Result<(String, Stream), HostError> {
        let protocols = protocols
            .iter()
            .map(|p| {
                StreamProtocol::try_from_owned(p.to_string())
                    .map_err(|_| HostError::InvalidProtocol(p.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !self.is_connected(peer_id) {
            return Err(HostError::NotConnected(*peer_id));
        }

        let peer_id = *peer_id;
        let (protocol, stream) = self
            .request(|reply| Command::OpenStream {
                peer_id,
                protocols,
                reply,
            })
            .await?
            .map_err(|source| HostError::OpenStream { peer_id, source })?;
        self.conn_manager().touch(&peer_id);
        Ok((protocol.to_string(), stream))
    }

    /// Serve inbound substreams for `protocol`, replacing any earlier handler.
    pub fn set_stream_handler(&self, protocol: impl Into<String>, handler: impl StreamHandler) {
        let protocol = protocol.into();
        if protocol == IDENTIFY_PROTOCOL.as_ref() {
            warn!(%protocol, "Refusing to replace the built-in identify handler");
            return;
        }
        if StreamProtocol::try_from_owned(protocol.clone()).is_err() {
            warn!(%protocol, "Ignoring handler for invalid protocol name");
            return;
        }
        debug!(%protocol, "Registered stream handler");
        let shared = &self.inner.shared;
        shared.handlers.write().insert(protocol, Arc::new(handler));
        self.publish_protocols();
    }

    pub fn remove_stream_handler(&self, protocol: &str) -> bool {
        let removed = self.inner.shared.handlers.write().remove(protocol).is_some();
        if removed {
            self.publish_protocols();
        }
        removed
    }

    /// Protocols with a registered handler, sorted. Identify is not included.
    pub fn supported_protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> =
            self.inner.shared.handlers.read().keys().cloned().collect();
        protocols.sort_unstable();
        protocols
    }

    fn publish_protocols(&self) {
        let protocols = self
            .supported_protocols()
            .into_iter()
            .filter_map(|p| StreamProtocol::try_from_owned(p).ok())
            .collect();
        *self.inner.shared.protocols.write() = protocols;
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.inner.shared.connections.lock().contains_key(peer_id)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.shared.connections.lock().keys().copied().collect()
    }

    pub fn connection_info(&self, peer_id: &PeerId) -> Option<ConnectionInfo> {
        self.inner.shared.connections.lock().get(peer_id).cloned()
    }

    /// Close the connection to `peer_id`. Returns whether one existed.
    pub async fn close_connection(&self, peer_id: &PeerId) -> bool {
        let peer_id = *peer_id;
        let closed = self
            .request(|reply| Command::CloseConnection { peer_id, reply })
            .await
            .unwrap_or(false);
        if closed {
            debug!(%peer_id, "Closed connection");
        }
        closed
    }

    /// Stop listeners and the event loop and close every connection.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        let done = self.request(|reply| Command::Close { reply }).await;
        self.inner.shared.closed.store(true, Ordering::Release);
        if done.is_err() {
            // The loop is already gone; nothing else will clear these.
            self.inner.shared.connections.lock().clear();
            self.inner.shared.listen_addrs.write().clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }
}
