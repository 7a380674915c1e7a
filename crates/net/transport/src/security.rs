//! Security upgrade that offers every registered protocol by name.

use std::error::Error;
use std::future::Future;

use futures::future::{self, BoxFuture};
use futures::{AsyncRead, AsyncWrite, FutureExt};
use libp2p::core::upgrade::{InboundConnectionUpgrade, OutboundConnectionUpgrade, UpgradeInfo};
use peerscope_identity::PeerId;

use crate::log::UpgradeLog;
use crate::registry::{Capability, SecurityConfig};
use crate::SecurityError;

/// A secured, authenticated byte stream.
pub trait SecureIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SecureIo for T {}

pub type SecuredStream = Box<dyn SecureIo>;

type Handshake = BoxFuture<'static, Result<(PeerId, SecuredStream), SecurityError>>;

/// Proposes the registered security protocols in preference order and runs
/// whichever one multistream-select settles on.
#[derive(Clone)]
pub struct SecurityUpgrade {
    capabilities: Vec<Capability<SecurityConfig>>,
    log: UpgradeLog,
}

impl SecurityUpgrade {
    pub fn new(capabilities: Vec<Capability<SecurityConfig>>, log: UpgradeLog) -> Self {
        Self { capabilities, log }
    }
}

impl UpgradeInfo for SecurityUpgrade {
    type Info = Capability<SecurityConfig>;
    type InfoIter = std::vec::IntoIter<Self::Info>;

    fn protocol_info(&self) -> Self::InfoIter {
        self.capabilities.clone().into_iter()
    }
}

impl<C> InboundConnectionUpgrade<C> for SecurityUpgrade
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Output = (PeerId, SecuredStream);
    type Error = SecurityError;
    type Future = Handshake;

    fn upgrade_inbound(self, socket: C, info: Self::Info) -> Self::Future {
        match info.config {
            SecurityConfig::Noise(config) => inbound(config, socket, info.name, self.log),
            SecurityConfig::Tls(config) => inbound(config, socket, info.name, self.log),
        }
    }
}

impl<C> OutboundConnectionUpgrade<C> for SecurityUpgrade
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Output = (PeerId, SecuredStream);
    type Error = SecurityError;
    type Future = Handshake;

    fn upgrade_outbound(self, socket: C, info: Self::Info) -> Self::Future {
        match info.config {
            SecurityConfig::Noise(config) => outbound(config, socket, info.name, self.log),
            SecurityConfig::Tls(config) => outbound(config, socket, info.name, self.log),
        }
    }
}

fn inbound<U, C, S>(upgrade: U, socket: C, name: String, log: UpgradeLog) -> Handshake
where
    U: InboundConnectionUpgrade<C, Output = (PeerId, S)>,
    U::Error: Error + Send + Sync + 'static,
    U::Future: Send + 'static,
    S: SecureIo + 'static,
{
    match upgrade.protocol_info().into_iter().next() {
        Some(inner) => secure(upgrade.upgrade_inbound(socket, inner), name, log),
        None => unnamed(name),
    }
}

fn outbound<U, C, S>(upgrade: U, socket: C, name: String, log: UpgradeLog) -> Handshake
where
    U: OutboundConnectionUpgrade<C, Output = (PeerId, S)>,
    U::Error: Error + Send + Sync + 'static,
    U::Future: Send + 'static,
    S: SecureIo + 'static,
{
    match upgrade.protocol_info().into_iter().next() {
        Some(inner) => secure(upgrade.upgrade_outbound(socket, inner), name, log),
        None => unnamed(name),
    }
}

fn secure<F, S, E>(handshake: F, name: String, log: UpgradeLog) -> Handshake
where
    F: Future<Output = Result<(PeerId, S), E>> + Send + 'static,
    S: SecureIo + 'static,
    E: Error + Send + Sync + 'static,
{
    async move {
        match handshake.await {
            Ok((peer, stream)) => {
                log.record_security(peer, &name);
                Ok((peer, Box::new(stream) as SecuredStream))
            }
            Err(e) => Err(SecurityError {
                protocol: name,
                source: Box::new(e),
            }),
        }
    }
    .boxed()
}

fn unnamed(name: String) -> Handshake {
    future::ready(Err(SecurityError {
        protocol: name,
        source: "upgrade advertises no protocol".into(),
    }))
    .boxed()
}
