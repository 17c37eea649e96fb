//! In-process cache tier
//!
//! [`MemoryTier`] is a plain mapping with TTLs and an item-count bound. It has
//! no internal locking: mutation takes `&mut self`, so sharing it between
//! tasks requires an outer lock. [`crate::TlCache`] keeps its memory tier
//! behind the orchestrator lock.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use tracing::debug;

use crate::{
    entry::{CacheEntry, Expiration},
    key::CacheKey,
};

/// Volatile cache tier
#[derive(Debug)]
pub struct MemoryTier {
    entries: HashMap<CacheKey, CacheEntry>,
    threshold: usize,
    default_timeout: Duration,
}

impl MemoryTier {
    /// Create a tier that prunes once it holds more than `threshold` entries
    pub fn new(threshold: usize, default_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            threshold,
            default_timeout,
        }
    }

    /// Look up a live value
    ///
    /// Expired entries are masked, not removed.
    pub fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone())
    }

    pub fn get_many<'a, I>(&self, keys: I) -> Vec<Option<serde_json::Value>>
    where
        I: IntoIterator<Item = &'a CacheKey>,
    {
        keys.into_iter().map(|key| self.get(key)).collect()
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.entries.get(key).is_some_and(CacheEntry::is_live)
    }

    /// Store a value, overwriting any existing entry
    pub fn set(&mut self, key: &CacheKey, value: serde_json::Value, timeout: Option<Duration>) {
        let expires = Expiration::from_timeout(timeout, self.default_timeout);
        self.prune();
        self.entries
            .insert(key.clone(), CacheEntry::new(value, expires));
    }

    /// Store a value only if the key is not present
    ///
    /// An expired entry still counts as present until it is pruned.
    pub fn add(&mut self, key: &CacheKey, value: serde_json::Value, timeout: Option<Duration>) -> bool {
        let expires = Expiration::from_timeout(timeout, self.default_timeout);
        self.prune();
        if self.entries.contains_key(key) {
            return false;
        }
        self.entries
            .insert(key.clone(), CacheEntry::new(value, expires));
        true
    }

    pub fn set_many<I>(&mut self, entries: I, timeout: Option<Duration>)
    where
        I: IntoIterator<Item = (CacheKey, serde_json::Value)>,
    {
        for (key, value) in entries {
            self.set(&key, value, timeout);
        }
    }

    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Delete every key, returning how many were present
    pub fn delete_many<'a, I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a CacheKey>,
    {
        keys.into_iter().filter(|key| self.delete(key)).count()
    }

    /// Add `delta` to an integer value
    ///
    /// A missing or non-integer value counts as zero. The result is stored
    /// with the default timeout.
    pub fn inc(&mut self, key: &CacheKey, delta: i64) -> i64 {
        let current = self
            .get(key)
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        let next = current.saturating_add(delta);
        self.set(key, serde_json::Value::from(next), None);
        next
    }

    pub fn dec(&mut self, key: &CacheKey, delta: i64) -> i64 {
        self.inc(key, delta.saturating_neg())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Single pass over the map: drop every expired entry plus every third
    // entry in iteration order, live or not.
    fn prune(&mut self) {
        if self.entries.len() <= self.threshold {
            return;
        }

        let now = SystemTime::now();
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(idx, (_, entry))| !entry.expires.is_live_at(now) || idx % 3 == 0)
            .map(|(_, (key, _))| key.clone())
            .collect();

        for key in &doomed {
            self.entries.remove(key);
        }
        debug!(
            "Pruned {} memory cache entries, {} remain",
            doomed.len(),
            self.entries.len()
        );
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(500, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::from(name)
    }

    #[test]
    fn test_memory_tier_basic_operations() {
        let mut tier = MemoryTier::default();

        tier.set(&key("k"), json!("value"), None);
        assert_eq!(tier.get(&key("k")), Some(json!("value")));
        assert_eq!(tier.get(&key("k")), Some(json!("value")));
        assert!(tier.has(&key("k")));
        assert!(!tier.has(&key("missing")));

        assert!(tier.delete(&key("k")));
        assert!(!tier.delete(&key("k")));
        assert_eq!(tier.get(&key("k")), None);
    }

    #[test]
    fn test_set_overwrites() {
        let mut tier = MemoryTier::default();
        tier.set(&key("k"), json!(1), None);
        tier.set(&key("k"), json!(2), None);
        assert_eq!(tier.get(&key("k")), Some(json!(2)));
    }

    #[test]
    fn test_add_only_inserts_absent_keys() {
        let mut tier = MemoryTier::default();
        assert!(tier.add(&key("k"), json!(1), None));
        assert!(!tier.add(&key("k"), json!(2), None));
        assert_eq!(tier.get(&key("k")), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_expired_entries_are_masked_not_removed() {
        let mut tier = MemoryTier::default();
        tier.set(&key("k"), json!("v"), Some(Duration::from_millis(20)));
        assert!(tier.has(&key("k")));

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(tier.get(&key("k")), None);
        assert!(!tier.has(&key("k")));
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_never_expires() {
        let mut tier = MemoryTier::new(10, Duration::from_millis(1));
        tier.set(&key("forever"), json!(true), Some(Duration::ZERO));
        tier.set(&key("default"), json!(true), None);

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(tier.has(&key("forever")));
        assert!(!tier.has(&key("default")));
    }

    #[test]
    fn test_prune_removes_every_third_entry() {
        let mut tier = MemoryTier::new(9, Duration::ZERO);
        for i in 0..10 {
            tier.set(&key(&format!("k{i}")), json!(i), None);
        }
        assert_eq!(tier.len(), 10);

        // 10 > 9 triggers a pass removing indices 0, 3, 6, 9
        tier.set(&key("trigger"), json!(0), None);
        assert_eq!(tier.len(), 10 - 4 + 1);
    }

    #[tokio::test]
    async fn test_prune_removes_all_expired_entries() {
        let mut tier = MemoryTier::new(4, Duration::ZERO);
        for i in 0..5 {
            tier.set(&key(&format!("stale{i}")), json!(i), Some(Duration::from_millis(5)));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        tier.set(&key("fresh"), json!("new"), None);
        assert_eq!(tier.len(), 1);
        assert!(tier.has(&key("fresh")));
    }

    #[test]
    fn test_no_prune_below_threshold() {
        let mut tier = MemoryTier::new(5, Duration::ZERO);
        for i in 0..6 {
            tier.set(&key(&format!("k{i}")), json!(i), None);
        }
        assert_eq!(tier.len(), 6);
    }

    #[test]
    fn test_bulk_operations() {
        let mut tier = MemoryTier::default();
        tier.set_many(vec![(key("a"), json!(1)), (key("b"), json!(2))], None);

        assert_eq!(
            tier.get_many([&key("a"), &key("missing"), &key("b")]),
            vec![Some(json!(1)), None, Some(json!(2))]
        );
        assert_eq!(tier.delete_many([&key("a"), &key("missing")]), 1);
        assert!(!tier.has(&key("a")));
    }

    #[test]
    fn test_inc_and_dec() {
        let mut tier = MemoryTier::default();
        assert_eq!(tier.inc(&key("n"), 1), 1);
        assert_eq!(tier.inc(&key("n"), 5), 6);
        assert_eq!(tier.dec(&key("n"), 2), 4);

        tier.set(&key("text"), json!("abc"), None);
        assert_eq!(tier.inc(&key("text"), 3), 3);
    }

    #[test]
    fn test_clear() {
        let mut tier = MemoryTier::default();
        tier.set(&key("a"), json!(1), None);
        tier.clear();
        assert!(tier.is_empty());
    }
}
