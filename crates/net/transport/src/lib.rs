//! Transport stack for peerscope.
//!
//! ```text
//! TCP / WebSocket (DNS)  ->  security (/noise, /tls/1.0.0)  ->  /yamux/1.0.0
//! ```
//!
//! Security protocols and multiplexers are capabilities registered by name
//! in a [`CapabilityRegistry`]. Registration order is the preference order
//! proposed during multistream-select negotiation.

mod error;
pub use error::{FailureKind, RegistryError, SecurityError, classify};

mod log;
pub use log::{NegotiatedProtocols, UpgradeLog};

mod muxer;
pub use muxer::MuxerUpgrade;

mod registry;
pub use registry::{
    Capability, CapabilityRegistry, Factory, MuxerConfig, MuxerRegistry, NOISE_PROTOCOL,
    SecurityConfig, SecurityRegistry, TLS_PROTOCOL, YAMUX_PROTOCOL, default_muxers,
    default_security,
};

mod security;
pub use security::{SecureIo, SecuredStream, SecurityUpgrade};

mod transport;
pub use transport::{PeerTransport, build_transport};
