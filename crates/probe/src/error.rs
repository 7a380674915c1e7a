use std::fmt;
use std::time::Duration;

use peerscope_host::HostError;
use peerscope_identity::{AddrInfoError, IdentityError, PeerId};
use peerscope_kad::KadError;

use crate::ConfigError;

/// Why a target string could not be turned into a peer.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("{0}")]
    Address(#[source] AddrInfoError),

    #[error("{0}")]
    PeerId(#[source] AddrInfoError),
}

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("no bootstrap peer reachable ({attempted} tried)")]
    NoBootstrapPeers { attempted: usize },

    #[error("routing: not found: {0}")]
    NotFound(PeerId),

    #[error(transparent)]
    Lookup(#[from] KadError),

    #[error("lookup aborted: {0}")]
    Host(#[source] HostError),
}

impl LocatorError {
    pub(crate) fn from_host(e: HostError) -> Self {
        match e {
            HostError::Kad(e) => Self::Lookup(e),
            other => Self::Host(other),
        }
    }
}

/// The failure classes a probe run can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    ResolutionFailed,
    NoReachableAddress,
    NegotiationFailed,
    NotConnected,
    Configuration,
    Deadline,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "parse",
            Self::ResolutionFailed => "resolution failed",
            Self::NoReachableAddress => "no reachable address",
            Self::NegotiationFailed => "negotiation failed",
            Self::NotConnected => "not connected",
            Self::Configuration => "configuration",
            Self::Deadline => "deadline exceeded",
        })
    }
}

/// A failed probe run. `Display` gives the line printed to the user.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not make host: {0}")]
    Identity(#[from] IdentityError),

    #[error("could not make host: {0}")]
    Host(#[source] HostError),

    #[error("could not parse peer: {0}")]
    Parse(#[from] TargetError),

    #[error("could not find peer: {0}")]
    Locate(#[from] LocatorError),

    #[error("could not connect: {0}")]
    Connect(#[source] HostError),

    #[error("couldn't get protos: {0}")]
    Protocols(#[source] HostError),

    #[error("probe did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Identity(_) | Self::Host(_) => ErrorKind::Configuration,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Locate(_) => ErrorKind::ResolutionFailed,
            Self::Connect(e) | Self::Protocols(e) => host_error_kind(e),
            Self::DeadlineExceeded(_) => ErrorKind::Deadline,
        }
    }
}

fn host_error_kind(e: &HostError) -> ErrorKind {
    match e {
        HostError::NegotiationFailed { .. } => ErrorKind::NegotiationFailed,
        HostError::NotConnected(_) | HostError::Closed | HostError::OpenStream { .. } => {
            ErrorKind::NotConnected
        }
        HostError::Config(_) | HostError::Listen { .. } | HostError::InvalidProtocol(_) => {
            ErrorKind::Configuration
        }
        HostError::Kad(_) => ErrorKind::ResolutionFailed,
        HostError::Timeout(_) => ErrorKind::Deadline,
        _ => ErrorKind::NoReachableAddress,
    }
}

#[cfg(test)]
mod tests {
    use peerscope_identity::LocalIdentity;

    use super::*;

    fn peer() -> PeerId {
        LocalIdentity::from_secret_bytes([7; 32]).unwrap().peer_id()
    }

    #[test]
    fn test_kinds() {
        let negotiation = ProbeError::Connect(HostError::NegotiationFailed {
            peer_id: peer(),
            attempts: Vec::new(),
        });
        assert_eq!(negotiation.kind(), ErrorKind::NegotiationFailed);

        let unreachable = ProbeError::Connect(HostError::NoReachableAddress {
            peer_id: peer(),
            attempts: Vec::new(),
        });
        assert_eq!(unreachable.kind(), ErrorKind::NoReachableAddress);

        let dial_self = ProbeError::Connect(HostError::DialSelf);
        assert_eq!(dial_self.kind(), ErrorKind::NoReachableAddress);

        let protos = ProbeError::Protocols(HostError::NotConnected(peer()));
        assert_eq!(protos.kind(), ErrorKind::NotConnected);

        let locate = ProbeError::from(LocatorError::NoBootstrapPeers { attempted: 5 });
        assert_eq!(locate.kind(), ErrorKind::ResolutionFailed);

        let deadline = ProbeError::DeadlineExceeded(Duration::from_secs(1));
        assert_eq!(deadline.kind(), ErrorKind::Deadline);

        let lookup = LocatorError::from_host(HostError::Kad(KadError::NoKnownPeers));
        assert!(matches!(lookup, LocatorError::Lookup(KadError::NoKnownPeers)));
        let aborted = LocatorError::from_host(HostError::Closed);
        assert!(matches!(aborted, LocatorError::Host(HostError::Closed)));

        let config = ProbeError::from(ConfigError::ZeroProbeTimeout);
        assert_eq!(config.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_messages() {
        let e = ProbeError::from(LocatorError::NotFound(peer()));
        assert_eq!(e.to_string(), format!("could not find peer: routing: not found: {}", peer()));

        let e = ProbeError::Protocols(HostError::NotConnected(peer()));
        assert!(e.to_string().starts_with("couldn't get protos: "));
    }
}
