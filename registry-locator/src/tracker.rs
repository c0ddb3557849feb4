use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;

use shared::types::BackendRecord;

/// Host-side view of the backends seen so far.
///
/// The discoverer hands over one record per beacon and keeps no history;
/// freshness and eviction are this type's job. Keyed by `(ip, port)` so a
/// backend restarting on a new port shows up as a new entry.
pub struct BackendTracker {
    stale_after: chrono::Duration,
    backends: HashMap<(IpAddr, u16), BackendRecord>,
}

impl BackendTracker {
    pub fn new(stale_after: Duration) -> Self {
        // Windows beyond a century are effectively "never expire".
        let stale_after = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            stale_after,
            backends: HashMap::new(),
        }
    }

    /// Record a sighting. Returns true when this backend was not already
    /// known, so callers can announce new arrivals without diffing.
    pub fn observe(&mut self, record: BackendRecord) -> bool {
        self.backends
            .insert((record.ip, record.port), record)
            .is_none()
    }

    /// Evict entries not seen within the stale window. Returns the number
    /// of evicted backends.
    pub fn prune(&mut self) -> usize {
        let cutoff = Utc::now() - self.stale_after;
        let before = self.backends.len();
        self.backends.retain(|_, record| record.last_seen >= cutoff);
        before - self.backends.len()
    }

    /// The most recently seen backend, if any.
    pub fn freshest(&self) -> Option<&BackendRecord> {
        self.backends.values().max_by_key(|record| record.last_seen)
    }

    /// All known backends, most recent first.
    pub fn backends(&self) -> Vec<&BackendRecord> {
        let mut all: Vec<&BackendRecord> = self.backends.values().collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        all
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
