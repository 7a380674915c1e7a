//! The peerscope host.
//!
//! A [`Host`] wraps a libp2p swarm: the transport stack from
//! `peerscope-transport`, identify, a connection limit of one per peer, the
//! DHT client and the application streams served by registered
//! [`StreamHandler`]s. Alongside it sit an
//! [`AddressBook`](peerscope_peerstore::AddressBook) filled by identify and a
//! [`ConnectionManager`](peerscope_connmgr::ConnectionManager) that trims
//! connections past its high watermark.

mod behaviour;

mod config;
pub use config::{DEFAULT_AGENT_VERSION, HostConfig, PROTOCOL_VERSION};

mod connection;
pub use connection::{ConnectionId, ConnectionInfo, Direction};

mod error;
pub use error::{DialError, DialFailure, HostConfigError, HostError, StreamError};

mod event_loop;

mod handler;
pub use handler::StreamHandler;

mod host;
pub use host::{Host, HostBuilder, WeakHost};

pub mod identify;
pub use identify::IDENTIFY_PROTOCOL;

mod kad;
pub use kad::Kademlia;

mod streams;

pub use libp2p::{Stream, StreamProtocol};
