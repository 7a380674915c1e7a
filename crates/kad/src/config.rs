use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use libp2p::StreamProtocol;
use libp2p::kad;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use crate::{AddressFilter, KadError};

pub const DEFAULT_PROTOCOL_PREFIX: &str = "/ipfs";
pub const DEFAULT_BUCKET_SIZE: usize = 20;
pub const DEFAULT_PARALLELISM: usize = 3;

/// Whether this node answers Kademlia requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Query only; the protocol is neither served nor advertised.
    #[default]
    Client,
    Server,
}

impl From<Mode> for kad::Mode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Client => Self::Client,
            Mode::Server => Self::Server,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// DHT configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KadConfig {
    /// Prefix of the protocol name; `/ipfs` gives `/ipfs/kad/1.0.0`.
    pub protocol_prefix: String,

    pub mode: Mode,

    /// Bucket capacity, and the number of closest peers a lookup converges on.
    pub bucket_size: usize,

    /// Queries in flight at once during a lookup.
    pub parallelism: usize,

    /// Deadline for one request on an open stream.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub query_timeout: Duration,

    /// Deadline for a whole lookup.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lookup_timeout: Duration,

    /// Applied to addresses learned from query responses.
    pub query_filter: AddressFilter,

    /// Applied to addresses before a peer enters the routing table.
    pub routing_table_filter: AddressFilter,
}

impl Default for KadConfig {
    fn default() -> Self {
        Self {
            protocol_prefix: DEFAULT_PROTOCOL_PREFIX.to_string(),
            mode: Mode::Client,
            bucket_size: DEFAULT_BUCKET_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            query_timeout: Duration::from_secs(10),
            lookup_timeout: Duration::from_secs(60),
            query_filter: AddressFilter::Public,
            routing_table_filter: AddressFilter::Public,
        }
    }
}

impl KadConfig {
    /// Config suited to nodes on one machine or LAN: accepts every address.
    pub fn local() -> Self {
        Self {
            query_filter: AddressFilter::Any,
            routing_table_filter: AddressFilter::Any,
            ..Self::default()
        }
    }

    pub fn protocol_name(&self) -> String {
        format!("{}/kad/1.0.0", self.protocol_prefix.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<(), KadError> {
        if !self.protocol_prefix.starts_with('/') {
            return Err(KadError::Config(format!(
                "protocol prefix {:?} must start with '/'",
                self.protocol_prefix
            )));
        }
        if self.bucket_size == 0 {
            return Err(KadError::Config("bucket size must be at least 1".into()));
        }
        if self.parallelism == 0 {
            return Err(KadError::Config("parallelism must be at least 1".into()));
        }
        Ok(())
    }

    /// Settings for the underlying libp2p behaviour. Routing table inserts
    /// are manual so every entry passes `routing_table_filter`.
    pub(crate) fn to_libp2p(&self) -> Result<kad::Config, KadError> {
        self.validate()?;
        let protocol = StreamProtocol::try_from_owned(self.protocol_name())
            .map_err(|e| KadError::Config(e.to_string()))?;
        let nonzero = |n: usize, what: &str| {
            NonZeroUsize::new(n).ok_or_else(|| KadError::Config(format!("{what} must be at least 1")))
        };

        let mut config = kad::Config::new(protocol);
        config
            .set_query_timeout(self.lookup_timeout)
            .set_substreams_timeout(self.query_timeout)
            .set_parallelism(nonzero(self.parallelism, "parallelism")?)
            .set_replication_factor(nonzero(self.bucket_size, "bucket size")?)
            .set_kbucket_size(nonzero(self.bucket_size, "bucket size")?)
            .set_kbucket_inserts(kad::BucketInserts::Manual)
            .set_periodic_bootstrap_interval(None);
        Ok(config)
    }
}
