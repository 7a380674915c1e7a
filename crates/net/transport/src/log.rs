use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use peerscope_identity::PeerId;

/// Protocol names picked while upgrading a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiatedProtocols {
    pub security: Option<String>,
    pub muxer: Option<String>,
}

/// Shared record of what each in-flight upgrade negotiated, keyed by the
/// authenticated peer. Entries are taken once the connection is established.
#[derive(Debug, Clone, Default)]
pub struct UpgradeLog {
    inner: Arc<Mutex<HashMap<PeerId, NegotiatedProtocols>>>,
}

impl UpgradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_security(&self, peer: PeerId, name: &str) {
        self.inner.lock().entry(peer).or_default().security = Some(name.to_string());
    }

    pub fn record_muxer(&self, peer: PeerId, name: &str) {
        self.inner.lock().entry(peer).or_default().muxer = Some(name.to_string());
    }

    pub fn take(&self, peer: &PeerId) -> NegotiatedProtocols {
        self.inner.lock().remove(peer).unwrap_or_default()
    }
}
