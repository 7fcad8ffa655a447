//! Type-erased per-source requests: the unit of extraction and combination.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cache::{Cache, CachedValue};
use crate::effect::{Effect, EffectTask};
use crate::key::{CacheKey, Identity};
use crate::query::{reify, ErasedValue};
use crate::source::{BatchExecution, DataSource};

/// Whether the request was written as a single fetch or a list fetch.
///
/// Only affects readback typing: a single fetch resolves to one value, a list
/// fetch to a vector in input order.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestShape {
    One,
    Many,
}

/// Result of executing one combined request against its source.
pub(crate) struct BatchOutcome {
    pub(crate) source: Arc<str>,
    pub(crate) entries: Vec<(CacheKey, CachedValue)>,
    pub(crate) missing: Vec<Identity>,
}

/// A request against one data source with the identity types erased.
///
/// The interpreter manipulates requests solely through this interface:
/// listing and checking identities against a cache, merging same-source
/// requests into round batches, executing a batch, and re-typing cached
/// values at the simplification site via the originating source's knowledge.
pub(crate) trait FetchQuery: Send + Sync {
    fn source_name(&self) -> Arc<str>;

    /// Deduplicated cache keys this request addresses.
    fn cache_keys(&self) -> Vec<CacheKey>;

    fn fulfilled_by(&self, cache: &dyn Cache) -> bool;

    fn missing_keys(&self, cache: &dyn Cache) -> Vec<CacheKey>;

    /// Deduplicated copy suitable for use as a round batch.
    fn to_batch(&self) -> Arc<dyn FetchQuery>;

    /// Union this batch with another request against the same source.
    ///
    /// Returns `None` when `other` is backed by a different concrete source
    /// type; such requests stay separate batches within the round.
    fn merge(&self, other: &dyn FetchQuery) -> Option<Arc<dyn FetchQuery>>;

    /// Copy of this batch restricted to the identities behind `keys`.
    fn restrict(&self, keys: &HashSet<CacheKey>) -> Arc<dyn FetchQuery>;

    /// Run this batch against its source, producing fetched entries and the
    /// identities the source reported absent.
    fn execute<'a>(&'a self, effect: &'a dyn Effect) -> EffectTask<'a>;

    /// Re-typed readback from the cache; `None` until every identity is
    /// present.
    fn read(&self, cache: &dyn Cache) -> Option<ErasedValue>;

    fn as_any(&self) -> &dyn Any;
}

/// Group requests by source name and union the identities of each group.
///
/// Input order of first appearance is preserved so round logs are stable.
pub(crate) fn combine(requests: Vec<Arc<dyn FetchQuery>>) -> Vec<Arc<dyn FetchQuery>> {
    let mut combined: Vec<Arc<dyn FetchQuery>> = Vec::new();
    'next: for request in requests {
        for slot in combined.iter_mut() {
            if slot.source_name() == request.source_name() {
                if let Some(merged) = slot.merge(request.as_ref()) {
                    *slot = merged;
                    continue 'next;
                }
            }
        }
        combined.push(request.to_batch());
    }
    combined
}

/// The concrete request behind the erased interface.
pub(crate) struct SourceRequest<S: DataSource> {
    source: Arc<S>,
    name: Arc<str>,
    ids: Vec<S::Id>,
    shape: RequestShape,
}

impl<S: DataSource> SourceRequest<S> {
    pub(crate) fn one(source: Arc<S>, id: S::Id) -> Self {
        let name = Arc::from(source.name());
        Self {
            source,
            name,
            ids: vec![id],
            shape: RequestShape::One,
        }
    }

    pub(crate) fn many(source: Arc<S>, ids: Vec<S::Id>) -> Self {
        let name = Arc::from(source.name());
        Self {
            source,
            name,
            ids,
            shape: RequestShape::Many,
        }
    }

    fn key_for(&self, id: &S::Id) -> CacheKey {
        CacheKey::new(self.name.clone(), self.source.identity(id))
    }

    fn deduped_ids(&self) -> Vec<S::Id> {
        let mut seen: HashSet<Identity> = HashSet::new();
        let mut ids = Vec::new();
        for id in &self.ids {
            if seen.insert(self.source.identity(id)) {
                ids.push(id.clone());
            }
        }
        ids
    }

    fn with_ids(&self, ids: Vec<S::Id>) -> Arc<dyn FetchQuery> {
        Arc::new(Self {
            source: self.source.clone(),
            name: self.name.clone(),
            ids,
            shape: self.shape,
        })
    }

    fn lookup(&self, cache: &dyn Cache, id: &S::Id) -> Option<S::Value> {
        cache
            .get(&self.key_for(id))?
            .downcast::<S::Value>()
            .ok()
            .map(|value| (*value).clone())
    }
}

impl<S: DataSource> FetchQuery for SourceRequest<S> {
    fn source_name(&self) -> Arc<str> {
        self.name.clone()
    }

    fn cache_keys(&self) -> Vec<CacheKey> {
        self.deduped_ids().iter().map(|id| self.key_for(id)).collect()
    }

    fn fulfilled_by(&self, cache: &dyn Cache) -> bool {
        self.ids.iter().all(|id| cache.contains(&self.key_for(id)))
    }

    fn missing_keys(&self, cache: &dyn Cache) -> Vec<CacheKey> {
        self.cache_keys()
            .into_iter()
            .filter(|key| !cache.contains(key))
            .collect()
    }

    fn to_batch(&self) -> Arc<dyn FetchQuery> {
        self.with_ids(self.deduped_ids())
    }

    fn merge(&self, other: &dyn FetchQuery) -> Option<Arc<dyn FetchQuery>> {
        let other = other.as_any().downcast_ref::<Self>()?;
        let mut ids = self.deduped_ids();
        let mut seen: HashSet<Identity> =
            ids.iter().map(|id| self.source.identity(id)).collect();
        for id in &other.ids {
            if seen.insert(other.source.identity(id)) {
                ids.push(id.clone());
            }
        }
        Some(self.with_ids(ids))
    }

    fn restrict(&self, keys: &HashSet<CacheKey>) -> Arc<dyn FetchQuery> {
        let ids = self
            .deduped_ids()
            .into_iter()
            .filter(|id| keys.contains(&self.key_for(id)))
            .collect();
        self.with_ids(ids)
    }

    fn execute<'a>(&'a self, effect: &'a dyn Effect) -> EffectTask<'a> {
        Box::pin(async move {
            let ids = self.deduped_ids();
            let mut outcome = BatchOutcome {
                source: self.name.clone(),
                entries: Vec::new(),
                missing: Vec::new(),
            };

            if let [id] = ids.as_slice() {
                let key = self.key_for(id);
                match self.source.fetch_one(id.clone()).run(effect).await? {
                    Some(value) => outcome
                        .entries
                        .push((key, Arc::new(value) as CachedValue)),
                    None => outcome.missing.push(key.identity().clone()),
                }
            } else {
                let chunks: Vec<Vec<S::Id>> = match self.source.max_batch_size() {
                    Some(limit) if limit > 0 => {
                        ids.chunks(limit).map(<[S::Id]>::to_vec).collect()
                    }
                    _ => vec![ids.clone()],
                };

                let mut fetched: HashMap<S::Id, S::Value> = HashMap::new();
                match self.source.batch_execution() {
                    BatchExecution::InParallel => {
                        let tasks: Vec<EffectTask<'_>> = chunks
                            .into_iter()
                            .map(|chunk| self.source.fetch_many(chunk).erased(effect))
                            .collect();
                        for map in effect.run_all(tasks).await? {
                            fetched.extend(reify::<HashMap<S::Id, S::Value>>(map));
                        }
                    }
                    BatchExecution::Sequentially => {
                        for chunk in chunks {
                            fetched.extend(
                                self.source.fetch_many(chunk).run(effect).await?,
                            );
                        }
                    }
                }

                for id in &ids {
                    let key = self.key_for(id);
                    match fetched.remove(id) {
                        Some(value) => outcome
                            .entries
                            .push((key, Arc::new(value) as CachedValue)),
                        None => outcome.missing.push(key.identity().clone()),
                    }
                }
            }

            Ok(Box::new(outcome) as ErasedValue)
        })
    }

    fn read(&self, cache: &dyn Cache) -> Option<ErasedValue> {
        match self.shape {
            RequestShape::One => {
                let id = self.ids.first()?;
                let value = self.lookup(cache, id)?;
                Some(Box::new(value) as ErasedValue)
            }
            RequestShape::Many => {
                let mut values = Vec::with_capacity(self.ids.len());
                for id in &self.ids {
                    values.push(self.lookup(cache, id)?);
                }
                Some(Box::new(values) as ErasedValue)
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
