//! Application substreams.
//!
//! Inbound streams negotiated to a protocol with a registered handler come
//! out as [`Event::Inbound`]. Outbound streams are opened on request and
//! handed back through a oneshot channel.

mod handler;
mod upgrade;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use handler::{Command, Handler, RequestId};
use libp2p::core::Endpoint;
use libp2p::core::transport::PortUse;
use libp2p::swarm::{
    ConnectionDenied, ConnectionId, FromSwarm, NetworkBehaviour, NotifyHandler, THandlerInEvent,
    THandlerOutEvent, ToSwarm,
};
use libp2p::{Multiaddr, PeerId, Stream, StreamProtocol};
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::trace;

use crate::StreamError;

pub(crate) type OpenResult = Result<(StreamProtocol, Stream), StreamError>;

#[derive(Debug)]
pub(crate) enum Event {
    Inbound {
        peer: PeerId,
        protocol: StreamProtocol,
        stream: Stream,
    },
}

pub(crate) struct Behaviour {
    protocols: Arc<RwLock<Vec<StreamProtocol>>>,
    timeout: Duration,
    /// Established connection count per peer.
    connected: HashMap<PeerId, usize>,
    pending: HashMap<RequestId, (PeerId, oneshot::Sender<OpenResult>)>,
    next_id: RequestId,
    events: VecDeque<ToSwarm<Event, Command>>,
}

impl Behaviour {
    pub(crate) fn new(protocols: Arc<RwLock<Vec<StreamProtocol>>>, timeout: Duration) -> Self {
        Self {
            protocols,
            timeout,
            connected: HashMap::new(),
            pending: HashMap::new(),
            next_id: 0,
            events: VecDeque::new(),
        }
    }

    /// Open a stream to `peer` and negotiate one of `protocols`, in
    /// preference order.
    pub(crate) fn open(
        &mut self,
        peer: PeerId,
        protocols: Vec<StreamProtocol>,
        reply: oneshot::Sender<OpenResult>,
    ) {
        if !self.connected.contains_key(&peer) {
            let _ = reply.send(Err(StreamError::ConnectionClosed));
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, (peer, reply));
        self.events.push_back(ToSwarm::NotifyHandler {
            peer_id: peer,
            handler: NotifyHandler::Any,
            event: Command::Open { id, protocols },
        });
    }

    fn reply(&mut self, id: RequestId, result: OpenResult) {
        if let Some((_, reply)) = self.pending.remove(&id) {
            let _ = reply.send(result);
        }
    }

    fn handler(&self) -> Handler {
        Handler::new(self.protocols.clone(), self.timeout)
    }
}

impl NetworkBehaviour for Behaviour {
    type ConnectionHandler = Handler;
    type ToSwarm = Event;

    fn handle_established_inbound_connection(
        &mut self,
        _: ConnectionId,
        _: PeerId,
        _: &Multiaddr,
        _: &Multiaddr,
    ) -> Result<Self::ConnectionHandler, ConnectionDenied> {
        Ok(self.handler())
    }

    fn handle_established_outbound_connection(
        &mut self,
        _: ConnectionId,
        _: PeerId,
        _: &Multiaddr,
        _: Endpoint,
        _: PortUse,
    ) -> Result<Self::ConnectionHandler, ConnectionDenied> {
        Ok(self.handler())
    }

    fn on_swarm_event(&mut self, event: FromSwarm) {
        match event {
            FromSwarm::ConnectionEstablished(established) => {
                *self.connected.entry(established.peer_id).or_default() += 1;
            }
            FromSwarm::ConnectionClosed(closed) => {
                if closed.remaining_established > 0 {
                    return;
                }
                self.connected.remove(&closed.peer_id);
                let failed: Vec<RequestId> = self
                    .pending
                    .iter()
                    .filter(|(_, (peer, _))| *peer == closed.peer_id)
                    .map(|(id, _)| *id)
                    .collect();
                for id in failed {
                    self.reply(id, Err(StreamError::ConnectionClosed));
                }
            }
            _ => {}
        }
    }

    fn on_connection_handler_event(
        &mut self,
        peer: PeerId,
        _: ConnectionId,
        event: THandlerOutEvent<Self>,
    ) {
        match event {
            handler::Event::Inbound { protocol, stream } => {
                self.events.push_back(ToSwarm::GenerateEvent(Event::Inbound {
                    peer,
                    protocol,
                    stream,
                }));
            }
            handler::Event::Opened {
                id,
                protocol,
                stream,
            } => {
                trace!(%peer, %protocol, "Opened stream");
                self.reply(id, Ok((protocol, stream)));
            }
            handler::Event::OpenFailed { id, error } => {
                trace!(%peer, %error, "Failed to open stream");
                self.reply(id, Err(error));
            }
        }
    }

    fn poll(&mut self, _: &mut Context<'_>) -> Poll<ToSwarm<Self::ToSwarm, THandlerInEvent<Self>>> {
        if let Some(event) = self.events.pop_front() {
            return Poll::Ready(event);
        }
        Poll::Pending
    }
}
