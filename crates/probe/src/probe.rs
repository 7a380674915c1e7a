use peerscope_dnsaddr::DnsaddrResolver;
use peerscope_host::{Host, HostError};
use peerscope_identity::{LocalIdentity, Multiaddr, PeerId};
use peerscope_transport::{MuxerRegistry, SecurityRegistry};
use tracing::{debug, info, warn};

use crate::{PeerLocator, ProbeConfig, ProbeError, ProbeEvent, ProbeObserver, ProbeTarget};

/// What a successful probe learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub peer_id: PeerId,
    /// Address the winning dial went to.
    pub remote_addr: Multiaddr,
    pub security: String,
    pub muxer: String,
    pub agent_version: Option<String>,
    pub protocols: Vec<String>,
}

/// One probe run: build a host, resolve the target, connect, ask for its
/// protocols, tear down.
pub struct Prober {
    config: ProbeConfig,
    identity: Option<LocalIdentity>,
    security: Option<SecurityRegistry>,
    muxers: Option<MuxerRegistry>,
    resolver: Option<DnsaddrResolver>,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            identity: None,
            security: None,
            muxers: None,
            resolver: None,
        }
    }

    /// Use a fixed identity instead of generating one.
    pub fn with_identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Security protocols, in preference order.
    pub fn with_security(mut self, security: SecurityRegistry) -> Self {
        self.security = Some(security);
        self
    }

    /// Multiplexers, in preference order.
    pub fn with_muxers(mut self, muxers: MuxerRegistry) -> Self {
        self.muxers = Some(muxers);
        self
    }

    pub fn with_resolver(mut self, resolver: DnsaddrResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run the probe against `target`, an overlay address or a bare peer id.
    ///
    /// The whole run, host setup included, is bounded by `probe_timeout`.
    /// The host is closed before returning.
    pub async fn run(
        mut self,
        target: &str,
        observer: &dyn ProbeObserver,
    ) -> Result<ProbeReport, ProbeError> {
        self.config.validate()?;
        let host = self.build_host()?;
        let timeout = self.config.probe_timeout;

        let outcome = tokio::time::timeout(timeout, self.execute(&host, target, observer)).await;
        host.close().await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "Probe deadline passed");
                Err(ProbeError::DeadlineExceeded(timeout))
            }
        }
    }

    fn build_host(&mut self) -> Result<Host, ProbeError> {
        let identity = match self.identity.take() {
            Some(identity) => identity,
            None => LocalIdentity::generate()?,
        };

        let mut builder = Host::builder(identity)
            .with_config(self.config.host.clone())
            .with_kad(self.config.dht.clone());
        if let Some(security) = self.security.take() {
            builder = builder.with_security(security);
        }
        if let Some(muxers) = self.muxers.take() {
            builder = builder.with_muxers(muxers);
        }
        builder.build().map_err(ProbeError::Host)
    }

    async fn execute(
        &self,
        host: &Host,
        target: &str,
        observer: &dyn ProbeObserver,
    ) -> Result<ProbeReport, ProbeError> {
        let listen = &self.config.host.listen_addrs;
        if !listen.is_empty() {
            let bound = host.listen(listen).await.map_err(ProbeError::Host)?;
            debug!(addrs = ?bound, "Listening");
        }
        let local = host.local_peer_id();
        info!(peer_id = %local, "Host ready");
        observer.on_event(&ProbeEvent::HostReady { peer_id: local });

        let info = match target.parse::<ProbeTarget>()? {
            ProbeTarget::Addr(info) => info,
            ProbeTarget::Peer(peer_id) => {
                let mut locator = PeerLocator::new(host.clone(), self.config.bootstrap.clone());
                if let Some(resolver) = &self.resolver {
                    locator = locator.with_resolver(resolver.clone());
                }
                locator.locate(&peer_id, observer).await?
            }
        };
        let peer_id = info.peer_id;

        observer.on_event(&ProbeEvent::Connecting(info.clone()));
        host.connect(&info).await.map_err(ProbeError::Connect)?;
        observer.on_event(&ProbeEvent::Connected);

        let protocols = host.protocols(&peer_id).map_err(ProbeError::Protocols)?;
        observer.on_event(&ProbeEvent::Protocols(protocols.clone()));

        let conn = host
            .connection_info(&peer_id)
            .ok_or(ProbeError::Protocols(HostError::NotConnected(peer_id)))?;
        info!(
            %peer_id,
            addr = %conn.remote_addr,
            security = %conn.security_protocol,
            muxer = %conn.muxer_protocol,
            protocols = protocols.len(),
            "Probe finished"
        );

        Ok(ProbeReport {
            peer_id,
            remote_addr: conn.remote_addr,
            security: conn.security_protocol,
            muxer: conn.muxer_protocol,
            agent_version: host.address_book().agent_version(&peer_id),
            protocols,
        })
    }
}
