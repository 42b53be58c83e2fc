//! Loop Prevention
//!
//! Forwarding a notification can cause the destination to touch the same
//! resource, which produces another notification, and so on. The dedup table
//! suppresses repeats of `(subscription id, resource path)` seen within a
//! short window. It is process-local and best-effort: a restart forgets
//! everything, and separate processes never share entries.
//!
//! Entries older than twice the window are evicted opportunistically on
//! writes, and the table never holds more than `max_entries` keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

/// Identity of a change event for loop prevention
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub subscription_id: String,
    pub resource_path: String,
}

impl DedupKey {
    pub fn new(subscription_id: &str, resource_path: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            resource_path: resource_path.to_string(),
        }
    }
}

/// Seen-event memory used by the dispatcher
pub trait DedupStore: Send + Sync {
    /// Record `key` as seen; `true` if it is novel, `false` for a duplicate
    fn check_and_record(&self, key: &DedupKey) -> bool;

    /// Number of keys currently remembered
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded, self-pruning dedup table
pub struct DedupTable {
    entries: DashMap<DedupKey, Instant>,
    window: Duration,
    max_entries: usize,
    suppressed: AtomicU64,
}

impl DedupTable {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            window,
            max_entries: max_entries.max(1),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Duplicates suppressed since creation
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Clock-injected form of [`DedupStore::check_and_record`]
    pub fn check_and_record_at(&self, key: &DedupKey, now: Instant) -> bool {
        self.evict_stale(now);

        let novel = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) < self.window {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };

        if novel {
            self.enforce_capacity();
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Suppressed duplicate notification for {} on {}",
                key.subscription_id, key.resource_path
            );
        }
        novel
    }

    /// Drop entries older than twice the window
    fn evict_stale(&self, now: Instant) {
        let horizon = self.window.saturating_mul(2);
        self.entries.retain(|_, seen| now.saturating_duration_since(*seen) <= horizon);
    }

    /// Drop the oldest entries until the table is back under its bound
    fn enforce_capacity(&self) {
        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(DedupKey, Instant)> = self.entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        by_age.sort_by_key(|(_, seen)| *seen);

        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        debug!("Dedup table over capacity, evicted {} oldest entries", excess);
    }
}

impl DedupStore for DedupTable {
    fn check_and_record(&self, key: &DedupKey) -> bool {
        self.check_and_record_at(key, Instant::now())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sub: &str) -> DedupKey {
        DedupKey::new(sub, "sites/a/lists/b")
    }

    #[test]
    fn test_duplicate_within_window() {
        let table = DedupTable::new(Duration::from_secs(60), 100);
        let start = Instant::now();

        assert!(table.check_and_record_at(&key("S1"), start));
        assert!(!table.check_and_record_at(&key("S1"), start + Duration::from_secs(30)));
        assert!(table.check_and_record_at(&key("S2"), start + Duration::from_secs(30)));
        assert_eq!(table.suppressed_count(), 1);
    }

    #[test]
    fn test_novel_again_after_window() {
        let table = DedupTable::new(Duration::from_secs(60), 100);
        let start = Instant::now();

        assert!(table.check_and_record_at(&key("S1"), start));
        assert!(table.check_and_record_at(&key("S1"), start + Duration::from_secs(61)));
        assert!(!table.check_and_record_at(&key("S1"), start + Duration::from_secs(90)));
    }

    #[test]
    fn test_resource_path_is_part_of_key() {
        let table = DedupTable::new(Duration::from_secs(60), 100);
        let start = Instant::now();

        assert!(table.check_and_record_at(&DedupKey::new("S1", "sites/a/lists/b"), start));
        assert!(table.check_and_record_at(&DedupKey::new("S1", "sites/a/lists/c"), start));
    }

    #[test]
    fn test_stale_entries_evicted() {
        let table = DedupTable::new(Duration::from_secs(10), 100);
        let start = Instant::now();

        table.check_and_record_at(&key("S1"), start);
        table.check_and_record_at(&key("S2"), start + Duration::from_secs(5));
        assert_eq!(table.len(), 2);

        // S1 is now 25s old (> 2x window), S2 is 20s old (== 2x window)
        table.check_and_record_at(&key("S3"), start + Duration::from_secs(25));
        assert_eq!(table.len(), 2);
        assert!(!table.entries.contains_key(&key("S1")));
    }

    #[test]
    fn test_unbounded_window_never_expires() {
        let table = DedupTable::new(Duration::from_secs(u64::MAX), 10);
        let start = Instant::now();

        assert!(table.check_and_record_at(&key("S1"), start));
        assert!(!table.check_and_record_at(&key("S1"), start + Duration::from_secs(86_400)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let table = DedupTable::new(Duration::from_secs(600), 3);
        let start = Instant::now();

        for (i, sub) in ["S1", "S2", "S3", "S4", "S5"].iter().enumerate() {
            table.check_and_record_at(&key(sub), start + Duration::from_secs(i as u64));
        }

        assert_eq!(table.len(), 3);
        assert!(!table.entries.contains_key(&key("S1")));
        assert!(table.entries.contains_key(&key("S5")));
    }

    #[test]
    fn test_concurrent_checks_admit_once() {
        use std::sync::Arc;

        let table = Arc::new(DedupTable::new(Duration::from_secs(60), 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.check_and_record(&key("S1")))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|novel| *novel)
            .count();
        assert_eq!(admitted, 1);
    }
}
