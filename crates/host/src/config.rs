//! Host configuration.

use std::num::NonZeroU8;
use std::time::Duration;

use peerscope_connmgr::ConnManagerConfig;
use peerscope_identity::Multiaddr;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use crate::HostConfigError;

pub const DEFAULT_AGENT_VERSION: &str = concat!("peerscope/", env!("CARGO_PKG_VERSION"));

/// Sent as the identify protocol version.
pub const PROTOCOL_VERSION: &str = "peerscope/1.0.0";

/// Configuration for a [`Host`](crate::Host).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Addresses to listen on. Empty means outbound only.
    pub listen_addrs: Vec<Multiaddr>,

    /// Connection manager watermarks and grace period.
    pub conn_manager: ConnManagerConfig,

    /// Deadline for one connection attempt: transport dial plus security and
    /// multiplexer upgrades. Accepted connections get the same deadline.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub dial_timeout: Duration,

    /// Default deadline for a whole `connect` call.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,

    /// Addresses dialed concurrently per `connect`. At most 255.
    pub dial_concurrency: usize,

    /// Deadline for negotiating a protocol on a new substream.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stream_timeout: Duration,

    /// How long `connect` waits for the identify exchange.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub identify_timeout: Duration,

    /// Agent string advertised through identify.
    pub agent_version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addrs: Vec::new(),
            conn_manager: ConnManagerConfig::default(),
            dial_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(60),
            dial_concurrency: 8,
            stream_timeout: Duration::from_secs(10),
            identify_timeout: Duration::from_secs(10),
            agent_version: DEFAULT_AGENT_VERSION.to_string(),
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<(), HostConfigError> {
        self.conn_manager.validate()?;
        self.dial_concurrency_factor()?;
        Ok(())
    }

    pub(crate) fn dial_concurrency_factor(&self) -> Result<NonZeroU8, HostConfigError> {
        u8::try_from(self.dial_concurrency)
            .ok()
            .and_then(NonZeroU8::new)
            .ok_or(HostConfigError::DialConcurrency(self.dial_concurrency))
    }
}
