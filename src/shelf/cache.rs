use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::{Metadata, NoteId};

/// Metadata of active notes keyed by id, refreshed from disk on a TTL.
///
/// Not synchronised itself; the store keeps it behind a single mutex.
#[derive(Debug)]
pub struct MetadataCache {
    entries: HashMap<NoteId, Metadata>,
    refreshed_at: Option<Instant>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            refreshed_at: None,
            ttl,
        }
    }

    /// True if no full refresh has happened yet or the last one is older
    /// than the TTL.
    pub fn is_stale(&self) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// Swaps in the result of a full scan.
    pub fn replace_all(&mut self, entries: HashMap<NoteId, Metadata>) {
        self.entries = entries;
        self.refreshed_at = Some(Instant::now());
    }

    pub fn get(&self, id: &NoteId) -> Option<&Metadata> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, metadata: Metadata) {
        self.entries.insert(metadata.id(), metadata);
    }

    pub fn remove(&mut self, id: &NoteId) {
        self.entries.remove(id);
    }

    /// Forgets everything, including when the last refresh happened.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.refreshed_at = None;
    }

    pub fn values(&self) -> impl Iterator<Item = &Metadata> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_is_stale_until_refreshed() {
        let mut cache = MetadataCache::new(Duration::from_secs(300));
        assert!(cache.is_stale());

        cache.replace_all(HashMap::new());
        assert!(!cache.is_stale());

        cache.clear();
        assert!(cache.is_stale());
    }

    #[test]
    fn zero_ttl_is_always_stale() {
        let mut cache = MetadataCache::new(Duration::ZERO);
        cache.replace_all(HashMap::new());
        assert!(cache.is_stale());
    }

    #[test]
    fn insert_and_remove_entries() {
        let mut cache = MetadataCache::new(Duration::from_secs(1));
        let meta = Metadata::new(NoteId::generate(), "t");
        let id = meta.id();

        cache.insert(meta);
        assert_eq!(cache.get(&id).map(|m| m.title()), Some("t"));
        assert_eq!(cache.len(), 1);

        cache.remove(&id);
        assert!(cache.is_empty());
    }
}
