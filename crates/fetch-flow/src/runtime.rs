//! The interpreter: rounds of extraction, batching, and concurrent execution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;

use crate::cache::{CacheSnapshot, CachedValue, InMemoryCache};
use crate::effect::{Effect, EffectTask, TokioEffect};
use crate::env::{Env, Round, RoundQuery, RoundStatus};
use crate::error::FetchError;
use crate::fetch::{advance, extract, simplify, Fetch, FetchNode};
use crate::key::{CacheKey, Identity};
use crate::query::{reify, ErasedValue};
use crate::request::{combine, BatchOutcome, FetchQuery};

/// Executes fetch programs against an [`Effect`] adapter.
///
/// Each run proceeds in rounds. A round collects every request reachable
/// without crossing an unresolved dependency, combines them into one
/// deduplicated batch per source, drops or trims whatever the cache already
/// holds, executes the surviving batches concurrently, then folds the results
/// back into the cache and rewrites the program before advancing.
///
/// # Example
///
/// ```ignore
/// use fetch_flow::{one, sequence, FetchRuntime};
///
/// let runtime = FetchRuntime::new();
/// let users = sequence(ids.into_iter().map(|id| one(&source, id)).collect());
/// // One round, one batched call, however many ids there are.
/// let users = runtime.run(users).await?;
/// ```
pub struct FetchRuntime<E: Effect = TokioEffect> {
    effect: E,
}

impl FetchRuntime<TokioEffect> {
    pub fn new() -> Self {
        Self {
            effect: TokioEffect,
        }
    }
}

impl Default for FetchRuntime<TokioEffect> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Effect> FetchRuntime<E> {
    /// A runtime driven by a custom effect adapter.
    pub fn with_effect(effect: E) -> Self {
        Self { effect }
    }

    /// Run a program to its value.
    pub async fn run<A: Send + 'static>(&self, fetch: Fetch<A>) -> Result<A, FetchError> {
        self.run_from(fetch, fresh_cache()).await
    }

    /// Run a program to its value, starting from `cache`.
    pub async fn run_from<A: Send + 'static>(
        &self,
        fetch: Fetch<A>,
        cache: CacheSnapshot,
    ) -> Result<A, FetchError> {
        let (_, _, value) = run_loop(fetch.node, &self.effect, cache).await?;
        Ok(reify(value))
    }

    /// Run a program and return its execution log, discarding the value.
    pub async fn run_env<A: Send + 'static>(
        &self,
        fetch: Fetch<A>,
    ) -> Result<Env, FetchError> {
        self.run_env_from(fetch, fresh_cache()).await
    }

    /// Run a program and return its execution log, starting from `cache`.
    pub async fn run_env_from<A: Send + 'static>(
        &self,
        fetch: Fetch<A>,
        cache: CacheSnapshot,
    ) -> Result<Env, FetchError> {
        let (env, _, _) = run_loop(fetch.node, &self.effect, cache).await?;
        Ok(env)
    }

    /// Run a program and return both its execution log and its value.
    pub async fn run_fetch<A: Send + 'static>(
        &self,
        fetch: Fetch<A>,
    ) -> Result<(Env, A), FetchError> {
        self.run_fetch_from(fetch, fresh_cache()).await
    }

    /// Run a program and return both its execution log and its value,
    /// starting from `cache`.
    pub async fn run_fetch_from<A: Send + 'static>(
        &self,
        fetch: Fetch<A>,
        cache: CacheSnapshot,
    ) -> Result<(Env, A), FetchError> {
        let (env, _, value) = run_loop(fetch.node, &self.effect, cache).await?;
        Ok((env, reify(value)))
    }

    /// Run a program and return the final cache snapshot with the value, so
    /// one run's cache can seed the next.
    pub async fn run_cache<A: Send + 'static>(
        &self,
        fetch: Fetch<A>,
    ) -> Result<(CacheSnapshot, A), FetchError> {
        self.run_cache_from(fetch, fresh_cache()).await
    }

    /// Run a program from `cache` and return the extended snapshot with the
    /// value.
    pub async fn run_cache_from<A: Send + 'static>(
        &self,
        fetch: Fetch<A>,
        cache: CacheSnapshot,
    ) -> Result<(CacheSnapshot, A), FetchError> {
        let (_, cache, value) = run_loop(fetch.node, &self.effect, cache).await?;
        Ok((cache, reify(value)))
    }
}

fn fresh_cache() -> CacheSnapshot {
    Arc::new(InMemoryCache::new())
}

async fn run_loop(
    node: FetchNode,
    effect: &dyn Effect,
    cache: CacheSnapshot,
) -> Result<(Env, CacheSnapshot, ErasedValue), FetchError> {
    let mut env = Env::default();
    let mut cache = cache;
    let mut node = node;

    loop {
        node = match advance(node) {
            FetchNode::Pure(value) => return Ok((env, cache, value)),
            FetchNode::Error(error) => return Err(error.with_env(env)),
            pending => pending,
        };

        let batches = combine(extract(&node));
        if batches.is_empty() {
            // A pending head with nothing runnable cannot make progress.
            return Err(FetchError::unhandled(anyhow!(
                "fetch program stalled with no runnable requests"
            ))
            .with_env(env));
        }

        // Cache filter: trim each batch to its missing identities; batches
        // with nothing missing are dropped from execution entirely.
        let mut queries = Vec::with_capacity(batches.len());
        let mut work: Vec<Arc<dyn FetchQuery>> = Vec::new();
        for batch in &batches {
            let missing = batch.missing_keys(cache.as_ref());
            let missing_set: HashSet<CacheKey> = missing.iter().cloned().collect();
            let keys = batch.cache_keys();
            queries.push(RoundQuery {
                source: batch.source_name(),
                requested: keys.iter().map(|key| key.identity().clone()).collect(),
                cached: keys
                    .iter()
                    .filter(|key| !missing_set.contains(key))
                    .map(|key| key.identity().clone())
                    .collect(),
                fetched: missing.iter().map(|key| key.identity().clone()).collect(),
            });
            if !missing.is_empty() {
                work.push(batch.restrict(&missing_set));
            }
        }

        let mut round = Round {
            queries,
            status: RoundStatus::Completed,
            duration: Duration::ZERO,
        };

        if work.is_empty() {
            // Every request was fulfilled from cache; no I/O this round.
            env.record(round);
            node = simplify(node, &cache);
            continue;
        }

        let started = Instant::now();
        let tasks: Vec<EffectTask<'_>> =
            work.iter().map(|batch| batch.execute(effect)).collect();
        let executed = effect.run_all(tasks).await;
        round.duration = started.elapsed();

        let outcomes = match executed {
            Ok(outcomes) => outcomes,
            Err(error) => {
                round.status = RoundStatus::Failed;
                env.record(round);
                return Err(error.with_env(env));
            }
        };

        let mut entries: Vec<(CacheKey, CachedValue)> = Vec::new();
        let mut failures: Vec<(usize, Arc<str>, Vec<Identity>)> = Vec::new();
        for (batch, outcome) in work.iter().zip(outcomes) {
            let outcome = reify::<BatchOutcome>(outcome);
            if !outcome.missing.is_empty() {
                failures.push((
                    batch.cache_keys().len(),
                    outcome.source.clone(),
                    outcome.missing,
                ));
            }
            entries.extend(outcome.entries);
        }

        if !failures.is_empty() {
            round.status = RoundStatus::Failed;
            env.record(round);
            // A combined request of one identity is a plain fetch and fails
            // as NotFound; anything larger is a partial batch.
            if failures.len() == 1 && failures[0].0 == 1 {
                let (_, source, mut identities) = failures.remove(0);
                return Err(FetchError::NotFound {
                    env,
                    source,
                    identity: identities.remove(0),
                });
            }
            let missing = failures
                .into_iter()
                .map(|(_, source, identities)| (source.to_string(), identities))
                .collect();
            return Err(FetchError::MissingIdentities { env, missing });
        }

        cache = cache.insert_all(entries);
        env.record(round);
        node = simplify(node, &cache);
    }
}
