//! Invite-code lookup cache.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::types::PocketId;

/// LRU map from normalized invite code to pocket id.
pub struct LookupCache {
    entries: Mutex<LruCache<String, PocketId>>,
}

impl LookupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, code: &str) -> Option<PocketId> {
        self.entries.lock().get(code).cloned()
    }

    pub fn insert(&self, code: impl Into<String>, pocket: PocketId) {
        self.entries.lock().put(code.into(), pocket);
    }

    pub fn invalidate(&self, code: &str) {
        self.entries.lock().pop(code);
    }

    /// Evict everything. Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_invalidate() {
        let cache = LookupCache::new(4);
        cache.insert("ABC234", PocketId::new("p1"));
        assert_eq!(cache.get("ABC234"), Some(PocketId::new("p1")));

        cache.invalidate("ABC234");
        assert_eq!(cache.get("ABC234"), None);
    }

    #[test]
    fn test_evicts_least_recent() {
        let cache = LookupCache::new(2);
        cache.insert("AAAAAA", PocketId::new("p1"));
        cache.insert("BBBBBB", PocketId::new("p2"));
        cache.get("AAAAAA");
        cache.insert("CCCCCC", PocketId::new("p3"));

        assert!(cache.get("BBBBBB").is_none());
        assert!(cache.get("AAAAAA").is_some());
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }
}
