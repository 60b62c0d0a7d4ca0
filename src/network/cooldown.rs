//! Refused-client cooldown tracking
//!
//! Maps a client host to the instant it was last refused. An entry older
//! than the grace period is treated as absent and removed on lookup; there
//! is no background sweep, since the map never holds more than a handful of
//! hosts at a time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default cooldown window for refused clients.
pub const GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Tracks recently-refused client hosts.
pub struct CooldownRegistry {
    /// Map from client host to the instant it was refused.
    entries: HashMap<String, Instant>,
    /// Entry expiry interval.
    grace: Duration,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::with_grace(GRACE_PERIOD)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            grace,
        }
    }

    /// Record a refusal for `host` at `now` (insert or refresh).
    pub fn stamp(&mut self, host: &str, now: Instant) {
        self.entries.insert(host.to_string(), now);
        tracing::info!(
            "[cooldown] [stamp] host={} grace={}s",
            host,
            self.grace.as_secs()
        );
    }

    /// Returns true if `host` was refused less than the grace period ago.
    /// Expired entries are removed as a side effect.
    pub fn is_active(&mut self, host: &str) -> bool {
        let stamped = match self.entries.get(host) {
            Some(at) => *at,
            None => return false,
        };
        if stamped.elapsed() > self.grace {
            self.clear(host);
            return false;
        }
        true
    }

    /// Remove any entry for `host`.
    pub fn clear(&mut self, host: &str) {
        if self.entries.remove(host).is_some() {
            tracing::debug!("[cooldown] [clear] host={}", host);
        }
    }

    /// Number of tracked hosts (expired entries included until looked up).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CooldownRegistry {
    fn default() -> Self {
        Self::new()
    }
}
