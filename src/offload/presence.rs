//! TTL-bounded memo of remote existence checks.
//!
//! Entries are soft: an expired or missing entry always means "ask the
//! store again". Both positive and negative answers are cached. Expired
//! entries for keys that are never read again are swept every
//! [`SWEEP_INTERVAL`] inserts.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Number of inserts between sweeps of expired entries.
pub const SWEEP_INTERVAL: usize = 256;

struct PresenceEntry {
    exists: bool,
    expires_at: Instant,
}

/// Thread-safe presence cache keyed by object key.
pub struct PresenceCache {
    entries: DashMap<String, PresenceEntry>,
    ttl: Duration,
    inserts: AtomicUsize,
}

impl PresenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            inserts: AtomicUsize::new(0),
        }
    }

    /// Cached answer for `key`, if still fresh.
    pub fn get(&self, key: &str) -> Option<bool> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.exists);
        }
        // Expired; drop the read guard before removing.
        drop(entry);
        self.entries
            .remove_if(key, |_, e| e.expires_at <= Instant::now());
        None
    }

    pub fn record(&self, key: &str, exists: bool) {
        self.entries.insert(
            key.to_string(),
            PresenceEntry {
                exists,
                expires_at: Instant::now() + self.ttl,
            },
        );
        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.cleanup_expired();
        }
    }

    pub fn forget(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}
