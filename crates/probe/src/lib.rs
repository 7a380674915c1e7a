//! Probe a peer: resolve it, connect securely, list its protocols.
//!
//! A [`Prober`] owns one run. Targets given as overlay addresses are dialed
//! directly; bare peer ids go through the [`PeerLocator`], which bootstraps
//! against seed peers and then asks the DHT. Progress is reported to a
//! [`ProbeObserver`] as [`ProbeEvent`]s.

mod config;
pub use config::{
    BootstrapConfig, ConfigError, DEFAULT_BOOTSTRAP_CONNECT_TIMEOUT, DEFAULT_PROBE_TIMEOUT,
    ProbeConfig,
};

mod error;
pub use error::{ErrorKind, LocatorError, ProbeError, TargetError};

mod events;
pub use events::{ProbeEvent, ProbeObserver};

mod locator;
pub use locator::{BOOTSTRAP_TAG, BootstrapOutcome, PeerLocator};

mod probe;
pub use probe::{ProbeReport, Prober};

pub mod seeds;

mod target;
pub use target::ProbeTarget;
