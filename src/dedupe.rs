//! Bounded LRU deduplication cache keyed by `{messageId}:{clientId}`.
//!
//! Matches the spec's dedupe semantics exactly: an unexpired hit is a
//! duplicate and is not re-stamped; a miss is inserted, evicting the LRU
//! entry if the cache is at capacity; entries older than the TTL are
//! treated as absent. A periodic purge (interval = `min(maxAge/2, 30s)`)
//! sweeps expired entries so the cache doesn't carry dead weight between
//! hits. Grounded on the teacher's `RefCell`-guarded, insertion-ordered
//! map idiom seen throughout `network/topic_manager.rs`.

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    arrived_at_ms: u64,
    /// Monotonically increasing counter used as an LRU recency stamp —
    /// avoids needing a linked list just to track eviction order.
    last_touch: u64,
}

#[derive(Debug, Clone)]
pub struct DedupeCacheConfig {
    pub max_entries: usize,
    pub max_age_ms: u64,
}

impl Default for DedupeCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_age_ms: 60_000,
        }
    }
}

impl DedupeCacheConfig {
    /// `min(maxAge/2, 30s)`, per spec §4.4.
    pub fn purge_interval_ms(&self) -> u64 {
        (self.max_age_ms / 2).min(30_000)
    }
}

pub struct DedupeCache {
    config: DedupeCacheConfig,
    entries: HashMap<String, Entry>,
    clock: u64,
    duplicates_seen: u64,
}

fn dedupe_key(message_id: &str, client_id: &str) -> String {
    format!("{message_id}:{client_id}")
}

impl DedupeCache {
    pub fn new(config: DedupeCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            clock: 0,
            duplicates_seen: 0,
        }
    }

    /// Check whether `(message_id, client_id)` was already seen within the
    /// TTL window. If not, mark it seen. Returns `true` when the message is
    /// fresh (should be dispatched), `false` when it's a duplicate.
    pub fn check_and_mark(&mut self, message_id: &str, client_id: &str, now_ms: u64) -> bool {
        let key = dedupe_key(message_id, client_id);
        self.clock += 1;
        let clock = self.clock;

        if let Some(entry) = self.entries.get_mut(&key) {
            if now_ms.saturating_sub(entry.arrived_at_ms) <= self.config.max_age_ms {
                self.duplicates_seen += 1;
                return false;
            }
            // Expired: treat as absent, refresh in place.
            entry.arrived_at_ms = now_ms;
            entry.last_touch = clock;
            return true;
        }

        if self.entries.len() >= self.config.max_entries {
            self.evict_lru();
        }

        self.entries.insert(
            key,
            Entry {
                arrived_at_ms: now_ms,
                last_touch: clock,
            },
        );
        true
    }

    fn evict_lru(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_touch)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
    }

    /// Drop every entry older than the TTL window. Called on the periodic
    /// timer and may also be invoked directly by tests.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let max_age = self.config.max_age_ms;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now_ms.saturating_sub(e.arrived_at_ms) <= max_age);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duplicates_seen(&self) -> u64 {
        self.duplicates_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_fresh() {
        let mut cache = DedupeCache::new(DedupeCacheConfig::default());
        assert!(cache.check_and_mark("m1", "c1", 0));
    }

    #[test]
    fn repeat_within_window_is_duplicate() {
        let mut cache = DedupeCache::new(DedupeCacheConfig::default());
        assert!(cache.check_and_mark("m1", "c1", 0));
        assert!(!cache.check_and_mark("m1", "c1", 10));
        assert_eq!(cache.duplicates_seen(), 1);
    }

    #[test]
    fn different_client_id_is_a_different_key() {
        let mut cache = DedupeCache::new(DedupeCacheConfig::default());
        assert!(cache.check_and_mark("m1", "c1", 0));
        assert!(cache.check_and_mark("m1", "c2", 0));
    }

    #[test]
    fn entries_older_than_ttl_are_treated_as_absent() {
        let mut cache = DedupeCache::new(DedupeCacheConfig {
            max_entries: 10,
            max_age_ms: 100,
        });
        assert!(cache.check_and_mark("m1", "c1", 0));
        assert!(cache.check_and_mark("m1", "c1", 200));
    }

    #[test]
    fn eviction_drops_least_recently_touched_entry() {
        let mut cache = DedupeCache::new(DedupeCacheConfig {
            max_entries: 2,
            max_age_ms: 1_000_000,
        });
        cache.check_and_mark("m1", "c1", 0);
        cache.check_and_mark("m2", "c1", 1);
        cache.check_and_mark("m3", "c1", 2); // evicts m1:c1
        assert_eq!(cache.len(), 2);
        assert!(cache.check_and_mark("m1", "c1", 3)); // fresh again
    }

    #[test]
    fn purge_expired_removes_stale_entries_only() {
        let mut cache = DedupeCache::new(DedupeCacheConfig {
            max_entries: 10,
            max_age_ms: 100,
        });
        cache.check_and_mark("old", "c1", 0);
        cache.check_and_mark("fresh", "c1", 150);
        let removed = cache.purge_expired(200);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_interval_matches_spec_formula() {
        assert_eq!(
            DedupeCacheConfig {
                max_entries: 1,
                max_age_ms: 120_000
            }
            .purge_interval_ms(),
            30_000
        );
        assert_eq!(
            DedupeCacheConfig {
                max_entries: 1,
                max_age_ms: 10_000
            }
            .purge_interval_ms(),
            5_000
        );
    }
}
