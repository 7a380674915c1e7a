//! Connection admission policy.
//!
//! Tracks live connections against a low/high watermark pair. Crossing the
//! high watermark wakes whoever is waiting on [`ConnectionManager::pressure`];
//! that owner then calls [`ConnectionManager::trim`] and closes the returned
//! peers. Admission itself is never refused: the watermarks only drive the
//! asynchronous trimming.
//!
//! Two kinds of connection are never trimmed:
//! - connections younger than the grace period
//! - connections to peers holding at least one protection tag

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use peerscope_identity::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, trace};
use web_time::Instant;

/// Low watermark used by the probe (matches long-standing libp2p host defaults).
pub const DEFAULT_LOW_WATER: usize = 1200;
/// High watermark used by the probe.
pub const DEFAULT_HIGH_WATER: usize = 1800;
/// Grace period for fresh connections.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);
/// Interval between periodic trim checks.
pub const DEFAULT_TRIM_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnManagerError {
    #[error("invalid watermarks: low ({low}) must not exceed high ({high}) and high must be non-zero")]
    InvalidWatermarks { low: usize, high: usize },

    #[error("trim interval must be non-zero")]
    ZeroTrimInterval,
}

/// Watermark configuration.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnManagerConfig {
    pub low_water: usize,
    pub high_water: usize,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub grace_period: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub trim_interval: Duration,
}

impl Default for ConnManagerConfig {
    fn default() -> Self {
        Self {
            low_water: DEFAULT_LOW_WATER,
            high_water: DEFAULT_HIGH_WATER,
            grace_period: DEFAULT_GRACE_PERIOD,
            trim_interval: DEFAULT_TRIM_INTERVAL,
        }
    }
}

impl ConnManagerConfig {
    pub fn validate(&self) -> Result<(), ConnManagerError> {
        if self.high_water == 0 || self.low_water > self.high_water {
            return Err(ConnManagerError::InvalidWatermarks {
                low: self.low_water,
                high: self.high_water,
            });
        }
        if self.trim_interval.is_zero() {
            return Err(ConnManagerError::ZeroTrimInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedConnection {
    opened_at: Instant,
    last_active: Instant,
}

#[derive(Debug, Default)]
struct ManagerState {
    conns: HashMap<PeerId, TrackedConnection>,
    /// Protection tags, kept independently of tracking so a peer can be
    /// protected before its connection is established.
    protected: HashMap<PeerId, HashSet<String>>,
}

impl ManagerState {
    fn is_protected(&self, peer_id: &PeerId) -> bool {
        self.protected.get(peer_id).is_some_and(|tags| !tags.is_empty())
    }
}

/// Watermark-driven connection manager (mutex-guarded counters).
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnManagerConfig,
    state: Mutex<ManagerState>,
    pressure: Notify,
}

impl ConnectionManager {
    pub fn new(config: ConnManagerConfig) -> Result<Self, ConnManagerError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(ManagerState::default()),
            pressure: Notify::new(),
        })
    }

    pub fn config(&self) -> &ConnManagerConfig {
        &self.config
    }

    /// Start tracking a connection. Returns `true` if the peer was not tracked.
    pub fn track(&self, peer_id: PeerId) -> bool {
        self.track_at(peer_id, Instant::now())
    }

    pub fn track_at(&self, peer_id: PeerId, now: Instant) -> bool {
        let (is_new, current) = {
            let mut state = self.state.lock();
            let is_new = !state.conns.contains_key(&peer_id);
            state
                .conns
                .entry(peer_id)
                .and_modify(|c| c.last_active = now)
                .or_insert(TrackedConnection {
                    opened_at: now,
                    last_active: now,
                });
            (is_new, state.conns.len())
        };

        trace!(%peer_id, current, "Tracking connection");
        if current > self.config.high_water {
            debug!(current, high = self.config.high_water, "Connection count above high watermark");
            self.pressure.notify_one();
        }
        is_new
    }

    pub fn untrack(&self, peer_id: &PeerId) -> bool {
        self.state.lock().conns.remove(peer_id).is_some()
    }

    /// Mark a connection as recently used.
    pub fn touch(&self, peer_id: &PeerId) {
        if let Some(conn) = self.state.lock().conns.get_mut(peer_id) {
            conn.last_active = Instant::now();
        }
    }

    pub fn protect(&self, peer_id: PeerId, tag: impl Into<String>) {
        let tag = tag.into();
        trace!(%peer_id, %tag, "Protecting peer");
        self.state
            .lock()
            .protected
            .entry(peer_id)
            .or_default()
            .insert(tag);
    }

    /// Drop one protection tag. Returns whether the peer is still protected.
    pub fn unprotect(&self, peer_id: &PeerId, tag: &str) -> bool {
        let mut state = self.state.lock();
        let Some(tags) = state.protected.get_mut(peer_id) else {
            return false;
        };
        tags.remove(tag);
        if tags.is_empty() {
            state.protected.remove(peer_id);
            return false;
        }
        true
    }

    pub fn is_protected(&self, peer_id: &PeerId) -> bool {
        self.state.lock().is_protected(peer_id)
    }

    pub fn is_tracked(&self, peer_id: &PeerId) -> bool {
        self.state.lock().conns.contains_key(peer_id)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().conns.len()
    }

    pub fn is_over_high_water(&self) -> bool {
        self.connection_count() > self.config.high_water
    }

    /// Wait until a tracked connection pushes the count above the high watermark.
    pub async fn pressure(&self) {
        self.pressure.notified().await
    }

    /// Select and untrack the connections to close. See [`Self::trim_at`].
    pub fn trim(&self) -> Vec<PeerId> {
        self.trim_at(Instant::now())
    }

    /// Select connections to close, least recently used first, until the
    /// count is back at the low watermark.
    ///
    /// Does nothing unless the count is above the high watermark. Selected
    /// peers are untracked before returning; the caller closes them.
    pub fn trim_at(&self, now: Instant) -> Vec<PeerId> {
        let mut state = self.state.lock();
        let current = state.conns.len();
        if current <= self.config.high_water {
            return Vec::new();
        }

        let mut candidates: Vec<(PeerId, TrackedConnection)> = state
            .conns
            .iter()
            .filter(|(peer_id, conn)| {
                !state.is_protected(peer_id)
                    && now.saturating_duration_since(conn.opened_at) >= self.config.grace_period
            })
            .map(|(peer_id, conn)| (*peer_id, *conn))
            .collect();
        candidates.sort_by_key(|(_, conn)| (conn.last_active, conn.opened_at));

        let excess = current.saturating_sub(self.config.low_water);
        let victims: Vec<PeerId> = candidates
            .into_iter()
            .take(excess)
            .map(|(peer_id, _)| peer_id)
            .collect();

        for peer_id in &victims {
            state.conns.remove(peer_id);
        }

        debug!(
            before = current,
            after = state.conns.len(),
            trimmed = victims.len(),
            "Trimmed connections"
        );
        victims
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use peerscope_identity::LocalIdentity;

    use super::*;

    fn peer(n: u8) -> PeerId {
        LocalIdentity::from_secret_bytes([n; 32]).unwrap().peer_id()
    }

    fn manager(low: usize, high: usize, grace_secs: u64) -> ConnectionManager {
        ConnectionManager::new(ConnManagerConfig {
            low_water: low,
            high_water: high,
            grace_period: Duration::from_secs(grace_secs),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_watermarks() {
        let config = ConnManagerConfig {
            low_water: 10,
            high_water: 5,
            ..Default::default()
        };
        assert_matches!(
            ConnectionManager::new(config),
            Err(ConnManagerError::InvalidWatermarks { low: 10, high: 5 })
        );

        let config = ConnManagerConfig {
            low_water: 0,
            high_water: 0,
            ..Default::default()
        };
        assert!(ConnectionManager::new(config).is_err());
    }

    #[test]
    fn test_zero_trim_interval_rejected() {
        let config = ConnManagerConfig {
            trim_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(ConnManagerError::ZeroTrimInterval));
        assert_matches!(
            ConnectionManager::new(config),
            Err(ConnManagerError::ZeroTrimInterval)
        );
    }

    #[test]
    fn test_track_untrack() {
        let mgr = manager(1, 2, 0);
        assert!(mgr.track(peer(1)));
        assert!(!mgr.track(peer(1)));
        assert_eq!(mgr.connection_count(), 1);
        assert!(mgr.untrack(&peer(1)));
        assert!(!mgr.untrack(&peer(1)));
        assert_eq!(mgr.connection_count(), 0);
    }

    #[test]
    fn test_no_trim_below_high_water() {
        let mgr = manager(1, 3, 0);
        let start = Instant::now();
        for n in 1..=3 {
            mgr.track_at(peer(n), start);
        }
        assert!(mgr.trim_at(start + Duration::from_secs(120)).is_empty());
        assert_eq!(mgr.connection_count(), 3);
    }

    #[test]
    fn test_trim_to_low_water_lru_first() {
        let mgr = manager(2, 4, 10);
        let start = Instant::now();
        for n in 1..=6 {
            mgr.track_at(peer(n), start + Duration::from_secs(n as u64));
        }

        let trimmed = mgr.trim_at(start + Duration::from_secs(100));
        assert_eq!(trimmed, vec![peer(1), peer(2), peer(3), peer(4)]);
        assert_eq!(mgr.connection_count(), 2);
        assert!(mgr.is_tracked(&peer(5)));
        assert!(mgr.is_tracked(&peer(6)));
    }

    #[test]
    fn test_trim_respects_grace_period() {
        let mgr = manager(0, 2, 60);
        let start = Instant::now();
        mgr.track_at(peer(1), start);
        mgr.track_at(peer(2), start + Duration::from_secs(50));
        mgr.track_at(peer(3), start + Duration::from_secs(55));

        // Only peer 1 is past its grace period.
        let trimmed = mgr.trim_at(start + Duration::from_secs(70));
        assert_eq!(trimmed, vec![peer(1)]);
        assert_eq!(mgr.connection_count(), 2);
    }

    #[test]
    fn test_trim_never_touches_protected() {
        let mgr = manager(0, 1, 0);
        let start = Instant::now();
        for n in 1..=4 {
            mgr.track_at(peer(n), start);
        }
        mgr.protect(peer(1), "bootstrap-peer");
        mgr.protect(peer(2), "bootstrap-peer");

        let trimmed = mgr.trim_at(start + Duration::from_secs(1));
        assert_eq!(trimmed.len(), 2);
        assert!(!trimmed.contains(&peer(1)));
        assert!(!trimmed.contains(&peer(2)));

        // Still above high water but no eligible candidates remain.
        assert!(mgr.is_over_high_water());
        assert!(mgr.trim_at(start + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn test_protection_tags_are_counted() {
        let mgr = manager(0, 1, 0);
        mgr.protect(peer(1), "a");
        mgr.protect(peer(1), "b");
        assert!(mgr.unprotect(&peer(1), "a"));
        assert!(mgr.is_protected(&peer(1)));
        assert!(!mgr.unprotect(&peer(1), "b"));
        assert!(!mgr.is_protected(&peer(1)));
        assert!(!mgr.unprotect(&peer(2), "a"));
    }

    #[test]
    fn test_touch_updates_lru_order() {
        let mgr = manager(1, 2, 0);
        let start = Instant::now();
        mgr.track_at(peer(1), start);
        mgr.track_at(peer(2), start + Duration::from_secs(1));
        mgr.track_at(peer(3), start + Duration::from_secs(2));

        // Re-tracking refreshes activity, so peer 1 is no longer the oldest.
        mgr.track_at(peer(1), start + Duration::from_secs(3));

        let trimmed = mgr.trim_at(start + Duration::from_secs(4));
        assert_eq!(trimmed, vec![peer(2), peer(3)]);
    }

    #[tokio::test]
    async fn test_pressure_wakes_on_high_water() {
        let mgr = std::sync::Arc::new(manager(0, 1, 0));
        mgr.track(peer(1));
        mgr.track(peer(2));

        tokio::time::timeout(Duration::from_secs(1), mgr.pressure())
            .await
            .expect("pressure notification");
    }
}
