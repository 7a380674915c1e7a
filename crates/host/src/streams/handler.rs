//! Per-connection side of the stream behaviour.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use libp2p::swarm::handler::{
    ConnectionEvent, ConnectionHandler, ConnectionHandlerEvent, DialUpgradeError,
    FullyNegotiatedInbound, FullyNegotiatedOutbound, ListenUpgradeError,
};
use libp2p::swarm::SubstreamProtocol;
use libp2p::{Stream, StreamProtocol};
use parking_lot::RwLock;
use tracing::trace;

use super::upgrade::StreamUpgrade;
use crate::StreamError;

/// Identifies one `open` request across the behaviour and its handlers.
pub(crate) type RequestId = u64;

#[derive(Debug)]
pub(crate) enum Command {
    Open {
        id: RequestId,
        protocols: Vec<StreamProtocol>,
    },
}

#[derive(Debug)]
pub(crate) enum Event {
    Inbound {
        protocol: StreamProtocol,
        stream: Stream,
    },
    Opened {
        id: RequestId,
        protocol: StreamProtocol,
        stream: Stream,
    },
    OpenFailed {
        id: RequestId,
        error: StreamError,
    },
}

pub(crate) struct Handler {
    /// Protocols with a registered handler. Read on every poll, so handlers
    /// added after the connection was established are served.
    protocols: Arc<RwLock<Vec<StreamProtocol>>>,
    timeout: Duration,
    pending_events: VecDeque<Event>,
    pending_commands: VecDeque<Command>,
}

impl Handler {
    pub(crate) fn new(protocols: Arc<RwLock<Vec<StreamProtocol>>>, timeout: Duration) -> Self {
        Self {
            protocols,
            timeout,
            pending_events: VecDeque::new(),
            pending_commands: VecDeque::new(),
        }
    }
}

impl ConnectionHandler for Handler {
    type FromBehaviour = Command;
    type ToBehaviour = Event;
    type InboundProtocol = StreamUpgrade;
    type OutboundProtocol = StreamUpgrade;
    type InboundOpenInfo = ();
    type OutboundOpenInfo = RequestId;

    fn listen_protocol(&self) -> SubstreamProtocol<Self::InboundProtocol, Self::InboundOpenInfo> {
        let protocols = self.protocols.read().clone();
        SubstreamProtocol::new(StreamUpgrade::new(protocols), ()).with_timeout(self.timeout)
    }

    /// The connection manager decides when a connection goes away.
    fn connection_keep_alive(&self) -> bool {
        true
    }

    fn poll(
        &mut self,
        _cx: &mut Context<'_>,
    ) -> Poll<ConnectionHandlerEvent<Self::OutboundProtocol, Self::OutboundOpenInfo, Self::ToBehaviour>>
    {
        if let Some(event) = self.pending_events.pop_front() {
            return Poll::Ready(ConnectionHandlerEvent::NotifyBehaviour(event));
        }

        if let Some(Command::Open { id, protocols }) = self.pending_commands.pop_front() {
            return Poll::Ready(ConnectionHandlerEvent::OutboundSubstreamRequest {
                protocol: SubstreamProtocol::new(StreamUpgrade::new(protocols), id)
                    .with_timeout(self.timeout),
            });
        }

        Poll::Pending
    }

    fn on_behaviour_event(&mut self, event: Self::FromBehaviour) {
        self.pending_commands.push_back(event);
    }

    fn on_connection_event(
        &mut self,
        event: ConnectionEvent<
            Self::InboundProtocol,
            Self::OutboundProtocol,
            Self::InboundOpenInfo,
            Self::OutboundOpenInfo,
        >,
    ) {
        match event {
            ConnectionEvent::FullyNegotiatedInbound(FullyNegotiatedInbound {
                protocol: (protocol, stream),
                ..
            }) => {
                trace!(%protocol, "Inbound stream negotiated");
                self.pending_events
                    .push_back(Event::Inbound { protocol, stream });
            }
            ConnectionEvent::FullyNegotiatedOutbound(FullyNegotiatedOutbound {
                protocol: (protocol, stream),
                info: id,
            }) => {
                self.pending_events.push_back(Event::Opened {
                    id,
                    protocol,
                    stream,
                });
            }
            ConnectionEvent::DialUpgradeError(DialUpgradeError { info: id, error }) => {
                self.pending_events.push_back(Event::OpenFailed {
                    id,
                    error: error.into(),
                });
            }
            ConnectionEvent::ListenUpgradeError(ListenUpgradeError { error, .. }) => match error {},
            _ => {}
        }
    }
}
