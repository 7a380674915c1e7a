use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KadError {
    #[error("cannot look up the local peer")]
    LookupSelf,

    #[error("routing table has no peers to query")]
    NoKnownPeers,

    #[error("all {failed} queries failed")]
    AllQueriesFailed { failed: usize },

    #[error("lookup timed out after {0:?} without a successful query")]
    Timeout(Duration),

    #[error("invalid DHT configuration: {0}")]
    Config(String),
}
