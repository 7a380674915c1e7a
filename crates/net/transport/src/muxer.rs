use futures::future::BoxFuture;
use futures::{AsyncRead, AsyncWrite, FutureExt, TryFutureExt};
use libp2p::core::upgrade::{InboundConnectionUpgrade, OutboundConnectionUpgrade, UpgradeInfo};
use libp2p::yamux;
use peerscope_identity::PeerId;

use crate::log::UpgradeLog;
use crate::registry::{Capability, MuxerConfig};

type YamuxError<C> = <yamux::Config as InboundConnectionUpgrade<C>>::Error;

/// Multiplexer upgrade for one authenticated connection.
#[derive(Clone)]
pub struct MuxerUpgrade {
    capabilities: Vec<Capability<MuxerConfig>>,
    peer: PeerId,
    log: UpgradeLog,
}

impl MuxerUpgrade {
    pub fn new(capabilities: Vec<Capability<MuxerConfig>>, peer: PeerId, log: UpgradeLog) -> Self {
        Self {
            capabilities,
            peer,
            log,
        }
    }
}

impl UpgradeInfo for MuxerUpgrade {
    type Info = Capability<MuxerConfig>;
    type InfoIter = std::vec::IntoIter<Self::Info>;

    fn protocol_info(&self) -> Self::InfoIter {
        self.capabilities.clone().into_iter()
    }
}

impl<C> InboundConnectionUpgrade<C> for MuxerUpgrade
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Output = yamux::Muxer<C>;
    type Error = YamuxError<C>;
    type Future = BoxFuture<'static, Result<Self::Output, Self::Error>>;

    fn upgrade_inbound(self, socket: C, info: Self::Info) -> Self::Future {
        let MuxerConfig::Yamux(config) = info.config;
        let inner = config.protocol_info().into_iter().next();
        let (log, peer, name) = (self.log, self.peer, info.name);
        InboundConnectionUpgrade::upgrade_inbound(config, socket, inner.unwrap_or_default())
            .inspect_ok(move |_| log.record_muxer(peer, &name))
            .boxed()
    }
}

impl<C> OutboundConnectionUpgrade<C> for MuxerUpgrade
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Output = yamux::Muxer<C>;
    type Error = YamuxError<C>;
    type Future = BoxFuture<'static, Result<Self::Output, Self::Error>>;

    fn upgrade_outbound(self, socket: C, info: Self::Info) -> Self::Future {
        let MuxerConfig::Yamux(config) = info.config;
        let inner = config.protocol_info().into_iter().next();
        let (log, peer, name) = (self.log, self.peer, info.name);
        OutboundConnectionUpgrade::upgrade_outbound(config, socket, inner.unwrap_or_default())
            .inspect_ok(move |_| log.record_muxer(peer, &name))
            .boxed()
    }
}
