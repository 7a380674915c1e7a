use std::error::Error;
use std::io;

use libp2p::core::upgrade::NegotiationError;

/// Errors from assembling security or multiplexer registries.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate {kind} registration: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("no {0} registered")]
    Empty(&'static str),

    #[error("invalid protocol name {0:?}")]
    InvalidName(String),

    #[error("unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },

    #[error("could not set up {name}: {reason}")]
    Build { name: String, reason: String },
}

/// A failed security handshake.
#[derive(Debug, thiserror::Error)]
#[error("{protocol} handshake failed: {source}")]
pub struct SecurityError {
    pub protocol: String,
    #[source]
    pub source: Box<dyn Error + Send + Sync>,
}

/// Where in the dial pipeline an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No security protocol or multiplexer in common, or the handshake failed.
    Negotiation,
    /// The per-address dial deadline passed.
    Timeout,
    /// Connect refused, DNS failure and everything else below the upgrade.
    Other,
}

/// Classify an error reported by the transport built in
/// [`build_transport`](crate::build_transport).
///
/// The error chain is walked through `io::Error` wrappers, which hide their
/// payload from [`Error::source`].
pub fn classify(error: &io::Error) -> FailureKind {
    let mut next: Option<&(dyn Error + 'static)> = Some(error);
    while let Some(current) = next {
        if let Some(negotiation) = current.downcast_ref::<NegotiationError>() {
            return match negotiation {
                NegotiationError::Failed => FailureKind::Negotiation,
                NegotiationError::ProtocolError(_) => FailureKind::Other,
            };
        }
        if current.is::<SecurityError>() {
            return FailureKind::Negotiation;
        }
        next = match current.downcast_ref::<io::Error>() {
            Some(io) if io.kind() == io::ErrorKind::TimedOut => return FailureKind::Timeout,
            Some(io) => match io.get_ref() {
                Some(inner) => Some(inner as &(dyn Error + 'static)),
                None => None,
            },
            None => current.source(),
        };
    }
    FailureKind::Other
}
