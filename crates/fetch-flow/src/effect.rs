//! The runtime capability that actually executes queries.

use std::time::Duration;

use anyhow::anyhow;
use futures::future::{try_join_all, BoxFuture};

use crate::error::FetchError;
use crate::query::ErasedValue;

/// An in-flight unit of work handed to an effect adapter.
pub type EffectTask<'a> = BoxFuture<'a, Result<ErasedValue, FetchError>>;

/// Scheduling capability injected at run time.
///
/// The interpreter is scheduler-agnostic: everything runtime-specific is
/// behind these two methods. `run_all` receives independent tasks and decides
/// how much they overlap; `deadline` guards a task with a timer. Sequencing,
/// value propagation, and error propagation are native `async`/`Result` and
/// need no adapter support.
///
/// Implementations must short-circuit `run_all` on the first failure; the
/// remaining tasks' results are discarded.
pub trait Effect: Send + Sync + 'static {
    /// Run independent tasks, concurrently where the scheduling model allows,
    /// returning their results in input order.
    fn run_all<'a>(
        &'a self,
        tasks: Vec<EffectTask<'a>>,
    ) -> BoxFuture<'a, Result<Vec<ErasedValue>, FetchError>>;

    /// Fail a task that has not produced a result within `limit`.
    fn deadline<'a>(&'a self, limit: Duration, task: EffectTask<'a>) -> EffectTask<'a>;
}

fn timeout_guard(limit: Duration, task: EffectTask<'_>) -> EffectTask<'_> {
    Box::pin(async move {
        match tokio::time::timeout(limit, task).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::unhandled(anyhow!(
                "query timed out after {limit:?}"
            ))),
        }
    })
}

/// Cooperative concurrent scheduling on the ambient tokio runtime.
///
/// Tasks are polled concurrently within the calling task, which overlaps
/// source I/O without requiring them to be spawnable. This is the default
/// adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioEffect;

impl Effect for TokioEffect {
    fn run_all<'a>(
        &'a self,
        tasks: Vec<EffectTask<'a>>,
    ) -> BoxFuture<'a, Result<Vec<ErasedValue>, FetchError>> {
        Box::pin(try_join_all(tasks))
    }

    fn deadline<'a>(&'a self, limit: Duration, task: EffectTask<'a>) -> EffectTask<'a> {
        timeout_guard(limit, task)
    }
}

/// Strictly in-order scheduling.
///
/// Independent tasks are awaited one after another. Batching and
/// deduplication are unaffected; only wall-clock overlap is lost. Useful for
/// deterministic tests and for sources that cannot tolerate overlap at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialEffect;

impl Effect for SequentialEffect {
    fn run_all<'a>(
        &'a self,
        tasks: Vec<EffectTask<'a>>,
    ) -> BoxFuture<'a, Result<Vec<ErasedValue>, FetchError>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                results.push(task.await?);
            }
            Ok(results)
        })
    }

    fn deadline<'a>(&'a self, limit: Duration, task: EffectTask<'a>) -> EffectTask<'a> {
        timeout_guard(limit, task)
    }
}
