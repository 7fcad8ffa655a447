//! Cache behavior: idempotent reruns, seeding, custom implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use fetch_flow::{
    many, one, sequence, Cache, CacheKey, CacheSnapshot, CachedValue, DataSource, Fetch,
    FetchRuntime, Identity, InMemoryCache, Query, SequentialEffect,
};

#[derive(Default)]
struct Counting {
    calls: AtomicU32,
}

impl Counting {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl DataSource for Counting {
    type Id = u32;
    type Value = u32;

    fn name(&self) -> &str {
        "counting"
    }

    fn fetch_one(&self, id: u32) -> Query<Option<u32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Query::sync(move || Some(id * 10))
    }

    fn fetch_many(&self, ids: Vec<u32>) -> Query<HashMap<u32, u32>> {
        self.calls.fetch_add(ids.len() as u32, Ordering::SeqCst);
        Query::sync(move || ids.into_iter().map(|id| (id, id * 10)).collect())
    }
}

fn lookup_all(source: &Arc<Counting>, ids: &[u32]) -> Fetch<Vec<u32>> {
    sequence(ids.iter().map(|id| one(source, *id)).collect())
}

#[tokio::test]
async fn rerunning_from_the_final_cache_issues_no_calls() {
    let source = Counting::new();
    let runtime = FetchRuntime::new();

    let (cache, first) = runtime
        .run_cache(lookup_all(&source, &[1, 2, 3]))
        .await
        .unwrap();
    let calls_after_first = source.calls.load(Ordering::SeqCst);

    let second = runtime
        .run_from(lookup_all(&source, &[1, 2, 3]), cache)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(source.calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn seeded_values_short_circuit_the_source() {
    let source = Counting::new();
    let runtime = FetchRuntime::new();

    let cache = InMemoryCache::new().seed(&*source, &1, 99).snapshot();
    let value = runtime.run_from(one(&source, 1), cache).await.unwrap();

    assert_eq!(value, 99);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

/// Source that records exactly which ids reach it, call by call.
#[derive(Default)]
struct Recording {
    received: Mutex<Vec<Vec<u32>>>,
}

impl DataSource for Recording {
    type Id = u32;
    type Value = u32;

    fn name(&self) -> &str {
        "recording"
    }

    fn fetch_one(&self, id: u32) -> Query<Option<u32>> {
        self.received.lock().unwrap().push(vec![id]);
        Query::sync(move || Some(id * 10))
    }

    fn fetch_many(&self, ids: Vec<u32>) -> Query<HashMap<u32, u32>> {
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        self.received.lock().unwrap().push(sorted);
        Query::sync(move || ids.into_iter().map(|id| (id, id * 10)).collect())
    }
}

#[tokio::test]
async fn partially_cached_batches_fetch_only_the_missing_identities() {
    let source = Arc::new(Recording::default());
    let runtime = FetchRuntime::new();

    let cache = InMemoryCache::new().seed(&*source, &1, 99).snapshot();
    let (env, values) = runtime
        .run_fetch_from(many(&source, vec![1, 2]), cache)
        .await
        .unwrap();

    // Identity 1 comes from the cache; the source only ever sees [2].
    assert_eq!(values, vec![99, 20]);
    assert_eq!(*source.received.lock().unwrap(), vec![vec![2]]);
    assert_eq!(env.rounds().len(), 1);
    assert_eq!(env.rounds()[0].cached_count(), 1);
    assert_eq!(env.rounds()[0].fetched_count(), 1);
}

#[tokio::test]
async fn unrelated_cache_entries_never_change_results() {
    let source = Counting::new();
    let runtime = FetchRuntime::new();

    let bare = runtime.run(one(&source, 1)).await.unwrap();

    let padded = InMemoryCache::new()
        .seed(&*source, &50, 1)
        .seed(&*source, &51, 2)
        .snapshot();
    let seeded = runtime.run_from(one(&source, 1), padded).await.unwrap();

    assert_eq!(bare, seeded);
}

#[tokio::test]
async fn the_cache_grows_monotonically_across_a_run() {
    let source = Counting::new();
    let runtime = FetchRuntime::new();

    let seeded = InMemoryCache::new().seed(&*source, &9, 90).snapshot();
    let (cache, _) = runtime
        .run_cache_from(one(&source, 1), seeded)
        .await
        .unwrap();

    let key = |id: u32| CacheKey::new(Arc::from("counting"), Identity::of(&id));
    assert!(cache.contains(&key(9)));
    assert!(cache.contains(&key(1)));
}

/// Minimal custom cache that counts hits, to exercise the trait surface.
#[derive(Clone, Default)]
struct CountingCache {
    entries: HashMap<CacheKey, CachedValue>,
    hits: Arc<Mutex<u32>>,
}

impl Cache for CountingCache {
    fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let value = self.entries.get(key).cloned();
        if value.is_some() {
            *self.hits.lock().unwrap() += 1;
        }
        value
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    fn insert_all(&self, entries: Vec<(CacheKey, CachedValue)>) -> CacheSnapshot {
        let mut extended = self.clone();
        extended.entries.extend(entries);
        Arc::new(extended)
    }
}

#[tokio::test]
async fn custom_cache_implementations_plug_in() {
    let source = Counting::new();
    let runtime = FetchRuntime::new();

    let hits = Arc::new(Mutex::new(0));
    let empty: CacheSnapshot = Arc::new(CountingCache {
        entries: HashMap::new(),
        hits: hits.clone(),
    });

    let (cache, first) = runtime
        .run_cache_from(one(&source, 4), empty)
        .await
        .unwrap();
    assert_eq!(first, 40);

    let second = runtime.run_from(one(&source, 4), cache).await.unwrap();
    assert_eq!(second, 40);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert!(*hits.lock().unwrap() > 0);
}

#[tokio::test]
async fn sequential_effect_matches_the_concurrent_one() {
    let concurrent_source = Counting::new();
    let sequential_source = Counting::new();

    let concurrent = FetchRuntime::new();
    let sequential = FetchRuntime::with_effect(SequentialEffect);

    let program = |source: &Arc<Counting>| {
        let chained_source = source.clone();
        lookup_all(source, &[1, 2, 3])
            .flat_map(move |values| one(&chained_source, values[0] + 1))
    };

    let (env_a, value_a) = concurrent
        .run_fetch(program(&concurrent_source))
        .await
        .unwrap();
    let (env_b, value_b) = sequential
        .run_fetch(program(&sequential_source))
        .await
        .unwrap();

    assert_eq!(value_a, value_b);
    assert_eq!(env_a.rounds().len(), env_b.rounds().len());
    assert_eq!(
        concurrent_source.calls.load(Ordering::SeqCst),
        sequential_source.calls.load(Ordering::SeqCst)
    );
}
