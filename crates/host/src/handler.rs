use std::future::Future;

use async_trait::async_trait;
use libp2p::Stream;
use peerscope_identity::PeerId;

/// Serves inbound substreams negotiated to one protocol.
///
/// Implemented for any `Fn(PeerId, Stream) -> impl Future<Output = ()>`.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    async fn handle(&self, peer_id: PeerId, stream: Stream);
}

#[async_trait]
impl<F, Fut> StreamHandler for F
where
    F: Fn(PeerId, Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, peer_id: PeerId, stream: Stream) {
        (self)(peer_id, stream).await
    }
}
