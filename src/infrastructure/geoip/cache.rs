//! TTL cache for GeoIP lookups.

use crate::core::geoip::GeoInfo;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    info: GeoInfo,
    cached_at: Instant,
}

/// Lookup results keyed by the raw IP string.
///
/// Entries older than the TTL are ignored on read and overwritten by the
/// next successful lookup; nothing sweeps them except [`GeoCache::clear`].
pub struct GeoCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl GeoCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached info if it is at most `ttl` old.
    pub fn get(&self, ip: &str) -> Option<GeoInfo> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(ip)?;

        if entry.cached_at.elapsed() > self.ttl {
            None
        } else {
            Some(entry.info.clone())
        }
    }

    pub fn insert(&self, ip: &str, info: GeoInfo) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                ip.to_string(),
                CacheEntry {
                    info,
                    cached_at: Instant::now(),
                },
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
