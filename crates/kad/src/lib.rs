//! Kademlia peer routing.
//!
//! A thin layer over `libp2p::kad`: configuration, address filtering, and
//! closest-peer lookups that answer with the target's addresses. By default
//! the node runs in client mode on `/ipfs/kad/1.0.0` and only keeps
//! globally routable addresses.

mod behaviour;
pub use behaviour::{Behaviour, Event, LookupResult};

mod config;
pub use config::{DEFAULT_BUCKET_SIZE, DEFAULT_PARALLELISM, DEFAULT_PROTOCOL_PREFIX, KadConfig, Mode};

mod error;
pub use error::KadError;

mod filter;
pub use filter::{AddressFilter, is_global_ip, is_public_addr};

pub use libp2p::kad::{PROTOCOL_NAME, QueryId};
