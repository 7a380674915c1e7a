//! Probe configuration, loaded from TOML.
//!
//! Every section and key is optional; missing ones take their defaults.
//!
//! ```toml
//! probe_timeout = 120
//!
//! [host]
//! dial_timeout = 15
//!
//! [host.conn_manager]
//! low_water = 1200
//! high_water = 1800
//!
//! [dht]
//! protocol_prefix = "/ipfs"
//! query_filter = "public"
//!
//! [bootstrap]
//! resolve_dnsaddr = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use peerscope_host::{HostConfig, HostConfigError};
use peerscope_identity::Multiaddr;
use peerscope_kad::{KadConfig, KadError};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use crate::seeds::default_bootstrap_peers;

/// Upper bound on a whole probe run.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline for connecting to one bootstrap peer.
pub const DEFAULT_BOOTSTRAP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid host configuration: {0}")]
    Host(#[from] HostConfigError),

    #[error(transparent)]
    Dht(#[from] KadError),

    #[error("probe timeout must be non-zero")]
    ZeroProbeTimeout,
}

/// Seed peers used to join the DHT.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Overlay addresses of the seeds. `/dnsaddr` entries are allowed.
    pub seeds: Vec<Multiaddr>,

    /// Expand `/dnsaddr` seeds through DNS TXT records before dialing.
    pub resolve_dnsaddr: bool,

    /// Deadline for connecting to one seed.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seeds: default_bootstrap_peers(),
            resolve_dnsaddr: true,
            connect_timeout: DEFAULT_BOOTSTRAP_CONNECT_TIMEOUT,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Upper bound on the whole run, lookup and connect included.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub probe_timeout: Duration,

    pub host: HostConfig,

    pub dht: KadConfig,

    pub bootstrap: BootstrapConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            host: HostConfig::default(),
            dht: KadConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ZeroProbeTimeout);
        }
        self.host.validate()?;
        self.dht.validate()?;
        Ok(())
    }
}
