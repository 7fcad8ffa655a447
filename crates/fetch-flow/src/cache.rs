//! Cache of previously resolved identities.

use std::any::Any;
use std::sync::Arc;

use crate::key::CacheKey;
use crate::source::DataSource;

/// Type-erased cached value; the owning source knows the concrete type.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// A shared, immutable view of a cache at one point in time.
pub type CacheSnapshot = Arc<dyn Cache>;

/// Mapping from `(source name, identity)` to a previously resolved value.
///
/// The interpreter consults the cache before every round and extends it after
/// every successful round. `insert_all` returns a fresh snapshot rather than
/// mutating, so a failed or cancelled round can never leave the working cache
/// half-updated, and snapshots can be consulted speculatively.
pub trait Cache: Send + Sync + 'static {
    fn get(&self, key: &CacheKey) -> Option<CachedValue>;

    fn contains(&self, key: &CacheKey) -> bool;

    /// A snapshot extended with `entries`; existing entries are preserved.
    fn insert_all(&self, entries: Vec<(CacheKey, CachedValue)>) -> CacheSnapshot;
}

/// Default in-memory cache backed by a persistent map.
///
/// Snapshots share structure, so cloning and extending are cheap. The cache
/// grows monotonically within one run; to carry it into another run, pass the
/// snapshot returned by [`FetchRuntime::run_cache`](crate::FetchRuntime::run_cache)
/// back in.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: im::HashMap<CacheKey, CachedValue>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this cache with one pre-resolved value in `source`'s
    /// namespace. Useful for warm starts and tests.
    pub fn seed<S: DataSource>(&self, source: &S, id: &S::Id, value: S::Value) -> Self {
        let key = CacheKey::new(Arc::from(source.name()), source.identity(id));
        let mut entries = self.entries.clone();
        entries.insert(key, Arc::new(value) as CachedValue);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Erase this cache into a shareable snapshot.
    pub fn snapshot(self) -> CacheSnapshot {
        Arc::new(self)
    }
}

impl Cache for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.entries.get(key).cloned()
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    fn insert_all(&self, entries: Vec<(CacheKey, CachedValue)>) -> CacheSnapshot {
        let mut extended = self.entries.clone();
        for (key, value) in entries {
            extended.insert(key, value);
        }
        Arc::new(Self { entries: extended })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Identity;

    fn key(source: &str, id: u32) -> CacheKey {
        CacheKey::new(Arc::from(source), Identity::of(&id))
    }

    #[test]
    fn insert_all_leaves_the_original_untouched() {
        let original = InMemoryCache::new();
        let extended = original.insert_all(vec![(
            key("users", 1),
            Arc::new("ada".to_string()) as CachedValue,
        )]);

        assert!(original.is_empty());
        assert!(extended.contains(&key("users", 1)));
    }

    #[test]
    fn values_round_trip_through_erasure() {
        let cache = InMemoryCache::new().insert_all(vec![(
            key("users", 1),
            Arc::new("ada".to_string()) as CachedValue,
        )]);

        let value = cache.get(&key("users", 1)).unwrap();
        let name = value.downcast::<String>().unwrap();
        assert_eq!(*name, "ada");
        assert!(cache.get(&key("users", 2)).is_none());
    }

    #[test]
    fn snapshots_share_earlier_entries() {
        let first = InMemoryCache::new().insert_all(vec![(
            key("users", 1),
            Arc::new(10u32) as CachedValue,
        )]);
        let second = first.insert_all(vec![(key("users", 2), Arc::new(20u32) as CachedValue)]);

        assert!(second.contains(&key("users", 1)));
        assert!(second.contains(&key("users", 2)));
        assert!(!first.contains(&key("users", 2)));
    }
}
