use std::convert::Infallible;
use std::fmt;
use std::io;
use std::time::Duration;

use libp2p::core::transport::TransportError;
use libp2p::swarm::{self, StreamUpgradeError};
use peerscope_connmgr::ConnManagerError;
use peerscope_identity::{Multiaddr, PeerId, split_p2p};
use peerscope_kad::KadError;
use peerscope_transport::{FailureKind, RegistryError, classify};

/// Why a host could not be built.
#[derive(Debug, thiserror::Error)]
pub enum HostConfigError {
    #[error(transparent)]
    ConnManager(#[from] ConnManagerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Kad(#[from] KadError),

    #[error("dial concurrency must be between 1 and 255, got {0}")]
    DialConcurrency(usize),
}

/// Failure of a single dial attempt.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("no transport for address")]
    UnsupportedAddress,

    #[error("negotiation failed: {0}")]
    Negotiation(#[source] io::Error),

    #[error("remote is {obtained}")]
    PeerIdMismatch { obtained: PeerId },

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Transport(#[source] io::Error),

    #[error("refused locally: {0}")]
    Denied(String),
}

impl DialError {
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(self, Self::Negotiation(_))
    }
}

impl From<TransportError<io::Error>> for DialError {
    fn from(e: TransportError<io::Error>) -> Self {
        match e {
            TransportError::MultiaddrNotSupported(_) => Self::UnsupportedAddress,
            TransportError::Other(e) => match classify(&e) {
                FailureKind::Negotiation => Self::Negotiation(e),
                FailureKind::Timeout => Self::Timeout,
                FailureKind::Other => Self::Transport(e),
            },
        }
    }
}

/// One failed address of a `connect` call.
#[derive(Debug)]
pub struct DialFailure {
    pub addr: Multiaddr,
    pub error: DialError,
}

impl DialFailure {
    /// Split a swarm dial error into one failure per address.
    pub(crate) fn from_swarm(error: swarm::DialError) -> Vec<Self> {
        match error {
            swarm::DialError::Transport(errors) => errors
                .into_iter()
                .map(|(addr, error)| Self {
                    addr: split_p2p(&addr).0,
                    error: error.into(),
                })
                .collect(),
            swarm::DialError::WrongPeerId { obtained, address } => vec![Self {
                addr: split_p2p(&address).0,
                error: DialError::PeerIdMismatch { obtained },
            }],
            swarm::DialError::Denied { cause } => vec![Self {
                addr: Multiaddr::empty(),
                error: DialError::Denied(cause.to_string()),
            }],
            swarm::DialError::LocalPeerId { address } => vec![Self {
                addr: split_p2p(&address).0,
                error: DialError::Denied("address belongs to the local peer".into()),
            }],
            swarm::DialError::NoAddresses
            | swarm::DialError::DialPeerConditionFalse(_)
            | swarm::DialError::Aborted => Vec::new(),
        }
    }

    /// A copy for a second caller waiting on the same dial. I/O errors keep
    /// their kind and message.
    pub(crate) fn duplicate(&self) -> Self {
        let io = |e: &io::Error| io::Error::new(e.kind(), e.to_string());
        let error = match &self.error {
            DialError::UnsupportedAddress => DialError::UnsupportedAddress,
            DialError::Negotiation(e) => DialError::Negotiation(io(e)),
            DialError::PeerIdMismatch { obtained } => DialError::PeerIdMismatch {
                obtained: *obtained,
            },
            DialError::Timeout => DialError::Timeout,
            DialError::Transport(e) => DialError::Transport(io(e)),
            DialError::Denied(reason) => DialError::Denied(reason.clone()),
        };
        Self {
            addr: self.addr.clone(),
            error,
        }
    }
}

impl fmt::Display for DialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.addr, self.error)
    }
}

struct Attempts<'a>(&'a [DialFailure]);

impl fmt::Display for Attempts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no attempts");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Failure to open a negotiated substream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("remote supports none of the requested protocols")]
    Unsupported,

    #[error("negotiation timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<StreamUpgradeError<Infallible>> for StreamError {
    fn from(e: StreamUpgradeError<Infallible>) -> Self {
        match e {
            StreamUpgradeError::Timeout => Self::Timeout,
            StreamUpgradeError::NegotiationFailed => Self::Unsupported,
            StreamUpgradeError::Io(e) => Self::Io(e),
            StreamUpgradeError::Apply(never) => match never {},
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid host configuration: {0}")]
    Config(#[from] HostConfigError),

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: Multiaddr,
        #[source]
        source: io::Error,
    },

    #[error("cannot dial self")]
    DialSelf,

    #[error("no reachable address for {peer_id} ({})", Attempts(.attempts))]
    NoReachableAddress {
        peer_id: PeerId,
        attempts: Vec<DialFailure>,
    },

    #[error("negotiation failed with {peer_id} ({})", Attempts(.attempts))]
    NegotiationFailed {
        peer_id: PeerId,
        attempts: Vec<DialFailure>,
    },

    #[error("not connected to {0}")]
    NotConnected(PeerId),

    #[error("invalid protocol name {0:?}")]
    InvalidProtocol(String),

    #[error("failed to open stream to {peer_id}: {source}")]
    OpenStream {
        peer_id: PeerId,
        #[source]
        source: StreamError,
    },

    #[error(transparent)]
    Kad(#[from] KadError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("host is closed")]
    Closed,
}

impl HostError {
    /// Every attempt failed during negotiation; never set for an empty list.
    pub(crate) fn from_attempts(peer_id: PeerId, attempts: Vec<DialFailure>) -> Self {
        let all_negotiation =
            !attempts.is_empty() && attempts.iter().all(|a| a.error.is_negotiation_failure());
        if all_negotiation {
            Self::NegotiationFailed { peer_id, attempts }
        } else {
            Self::NoReachableAddress { peer_id, attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use libp2p::core::upgrade::NegotiationError;

    use super::*;

    fn peer() -> PeerId {
        PeerId::random()
    }

    #[test]
    fn test_transport_errors_are_classified() {
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/1".parse().unwrap();
        assert_matches!(
            DialError::from(TransportError::MultiaddrNotSupported(addr)),
            DialError::UnsupportedAddress
        );

        let failed = io::Error::other(NegotiationError::Failed);
        assert_matches!(
            DialError::from(TransportError::Other(failed)),
            DialError::Negotiation(_)
        );

        let timeout = io::Error::other(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_matches!(
            DialError::from(TransportError::Other(timeout)),
            DialError::Timeout
        );

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_matches!(
            DialError::from(TransportError::Other(refused)),
            DialError::Transport(_)
        );
    }

    #[test]
    fn test_negotiation_failed_needs_every_attempt() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let negotiation = || DialFailure {
            addr: addr.clone(),
            error: DialError::Negotiation(io::Error::other(NegotiationError::Failed)),
        };

        assert_matches!(
            HostError::from_attempts(peer(), vec![negotiation(), negotiation()]),
            HostError::NegotiationFailed { .. }
        );
        assert_matches!(
            HostError::from_attempts(
                peer(),
                vec![
                    negotiation(),
                    DialFailure {
                        addr: addr.clone(),
                        error: DialError::Timeout,
                    }
                ]
            ),
            HostError::NoReachableAddress { .. }
        );
        assert_matches!(
            HostError::from_attempts(peer(), Vec::new()),
            HostError::NoReachableAddress { .. }
        );
    }

    #[test]
    fn test_swarm_errors_split_per_address() {
        let obtained = peer();
        let address: Multiaddr = format!("/ip4/127.0.0.1/tcp/1/p2p/{}", peer()).parse().unwrap();
        let failures = DialFailure::from_swarm(swarm::DialError::WrongPeerId {
            obtained,
            address,
        });
        assert_matches!(
            failures.as_slice(),
            [DialFailure { addr, error: DialError::PeerIdMismatch { obtained: o } }]
                if *o == obtained && addr.to_string() == "/ip4/127.0.0.1/tcp/1"
        );
        assert!(DialFailure::from_swarm(swarm::DialError::Aborted).is_empty());
    }
}
