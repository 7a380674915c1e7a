//! Progress reporting.

use std::fmt;

use peerscope_identity::{PeerAddrInfo, PeerId};

/// A milestone of a probe run. `Display` renders the progress line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    HostReady { peer_id: PeerId },
    Bootstrapping,
    StartingDht,
    Connecting(PeerAddrInfo),
    Connected,
    Protocols(Vec<String>),
}

impl fmt::Display for ProbeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostReady { .. } => f.write_str("host made..."),
            Self::Bootstrapping => f.write_str("bootstrapping..."),
            Self::StartingDht => f.write_str("starting DHT..."),
            Self::Connecting(info) => write!(f, "connecting to {info}..."),
            Self::Connected => f.write_str("connected..."),
            Self::Protocols(protocols) => write!(f, "protocols: [{}]", protocols.join(" ")),
        }
    }
}

/// Receives progress events as a run advances.
pub trait ProbeObserver: Send + Sync {
    fn on_event(&self, event: &ProbeEvent);
}

impl<F> ProbeObserver for F
where
    F: Fn(&ProbeEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProbeEvent) {
        self(event)
    }
}
