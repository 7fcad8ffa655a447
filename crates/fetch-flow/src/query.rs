//! The leaf algebra describing one call to a data source.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::BoxFuture;

use crate::effect::{Effect, EffectTask};
use crate::error::FetchError;

/// A type-erased value moving through the interpreter.
///
/// Values are erased at the program boundary and re-typed by the code that
/// produced them; see [`Effect`](crate::Effect) for where these surface in
/// the public API.
pub type ErasedValue = Box<dyn Any + Send>;

/// Recover a concrete value from its erased form.
///
/// Callers only reify values they erased themselves, so a mismatch is an
/// internal invariant violation rather than a user error.
pub(crate) fn reify<A: 'static>(value: ErasedValue) -> A {
    *value
        .downcast::<A>()
        .expect("erased value carried a type other than the one its producer declared")
}

type Thunk = Box<dyn FnOnce() -> ErasedValue + Send>;
type Mapper = Box<dyn FnOnce(ErasedValue) -> ErasedValue + Send>;
type QueryFuture = BoxFuture<'static, Result<ErasedValue, anyhow::Error>>;

pub(crate) enum QueryNode {
    /// Deferred pure computation, evaluated once when observed.
    Sync(Thunk),
    /// Asynchronous computation with an optional deadline; `None` disables
    /// the guard.
    Async {
        future: QueryFuture,
        timeout: Option<Duration>,
    },
    /// Applicative product: both sides are independent and may be scheduled
    /// concurrently by the effect adapter.
    Zip(Box<QueryNode>, Box<QueryNode>),
    Map(Box<QueryNode>, Mapper),
}

impl QueryNode {
    pub(crate) fn run<'a>(
        self,
        effect: &'a dyn Effect,
    ) -> BoxFuture<'a, Result<ErasedValue, FetchError>> {
        match self {
            QueryNode::Sync(thunk) => Box::pin(async move { Ok(thunk()) }),
            QueryNode::Async { future, timeout } => {
                let task: EffectTask<'a> =
                    Box::pin(async move { future.await.map_err(FetchError::unhandled) });
                match timeout {
                    Some(limit) => effect.deadline(limit, task),
                    None => task,
                }
            }
            QueryNode::Zip(left, right) => Box::pin(async move {
                let mut results = effect
                    .run_all(vec![left.run(effect), right.run(effect)])
                    .await?;
                let second = results.pop();
                let first = results.pop();
                match (first, second) {
                    (Some(first), Some(second)) => {
                        Ok(Box::new((first, second)) as ErasedValue)
                    }
                    _ => Err(FetchError::unhandled(anyhow!(
                        "effect adapter returned the wrong number of results"
                    ))),
                }
            }),
            QueryNode::Map(inner, f) => {
                Box::pin(async move { Ok(f(inner.run(effect).await?)) })
            }
        }
    }
}

/// A description of one call that yields an `A` when executed.
///
/// Queries are what [`DataSource`](crate::DataSource) implementations hand
/// back from `fetch_one` and `fetch_many`. They are inert until executed by
/// an [`Effect`] adapter, and compose applicatively: [`Query::zip`] pairs two
/// independent queries, which the adapter is free to run concurrently.
///
/// # Example
///
/// ```ignore
/// use fetch_flow::Query;
///
/// // Pure, deferred:
/// let q = Query::sync(|| 42);
///
/// // Backed by real I/O, guarded by a deadline:
/// let q = Query::from_future_timeout(
///     async { Ok(api.lookup(7).await?) },
///     Duration::from_secs(2),
/// );
/// ```
pub struct Query<A> {
    node: QueryNode,
    marker: PhantomData<fn() -> A>,
}

impl<A: Send + 'static> Query<A> {
    fn from_node(node: QueryNode) -> Self {
        Self {
            node,
            marker: PhantomData,
        }
    }

    /// A deferred pure computation, evaluated at most once when observed.
    pub fn sync(thunk: impl FnOnce() -> A + Send + 'static) -> Self {
        Self::from_node(QueryNode::Sync(Box::new(move || {
            Box::new(thunk()) as ErasedValue
        })))
    }

    /// An asynchronous computation with no deadline.
    pub fn from_future(
        future: impl Future<Output = Result<A, anyhow::Error>> + Send + 'static,
    ) -> Self {
        Self::from_node(QueryNode::Async {
            future: Box::pin(async move {
                future.await.map(|value| Box::new(value) as ErasedValue)
            }),
            timeout: None,
        })
    }

    /// An asynchronous computation that fails if it has not produced a result
    /// within `timeout`.
    pub fn from_future_timeout(
        future: impl Future<Output = Result<A, anyhow::Error>> + Send + 'static,
        timeout: Duration,
    ) -> Self {
        Self::from_node(QueryNode::Async {
            future: Box::pin(async move {
                future.await.map(|value| Box::new(value) as ErasedValue)
            }),
            timeout: Some(timeout),
        })
    }

    /// Transform the result of this query.
    pub fn map<B: Send + 'static>(
        self,
        f: impl FnOnce(A) -> B + Send + 'static,
    ) -> Query<B> {
        Query::from_node(QueryNode::Map(
            Box::new(self.node),
            Box::new(move |value| Box::new(f(reify::<A>(value))) as ErasedValue),
        ))
    }

    /// Pair this query with an independent one.
    ///
    /// The two sides carry no data dependency, so the effect adapter may run
    /// them concurrently.
    pub fn zip<B: Send + 'static>(self, other: Query<B>) -> Query<(A, B)> {
        Query::from_node(QueryNode::Map(
            Box::new(QueryNode::Zip(Box::new(self.node), Box::new(other.node))),
            Box::new(|pair| {
                let (left, right) = reify::<(ErasedValue, ErasedValue)>(pair);
                Box::new((reify::<A>(left), reify::<B>(right))) as ErasedValue
            }),
        ))
    }

    /// Collect a vector of independent queries into one query of a vector,
    /// preserving order.
    pub fn all(queries: Vec<Query<A>>) -> Query<Vec<A>> {
        queries.into_iter().fold(
            Query::sync(Vec::new),
            |collected, query| {
                collected.zip(query).map(|(mut values, value)| {
                    values.push(value);
                    values
                })
            },
        )
    }

    /// Execute this query through an effect adapter.
    pub async fn run(self, effect: &dyn Effect) -> Result<A, FetchError> {
        Ok(reify(self.node.run(effect).await?))
    }

    pub(crate) fn erased<'a>(self, effect: &'a dyn Effect) -> EffectTask<'a> {
        self.node.run(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::TokioEffect;

    #[tokio::test]
    async fn sync_defers_until_observed() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let evaluations = Arc::new(AtomicU32::new(0));
        let seen = evaluations.clone();
        let query = Query::sync(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            7
        });
        assert_eq!(evaluations.load(Ordering::SeqCst), 0);

        let value = query.run(&TokioEffect).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zip_pairs_independent_results() {
        let left = Query::sync(|| 1);
        let right = Query::from_future(async { Ok("two") });
        let value = left.zip(right).run(&TokioEffect).await.unwrap();
        assert_eq!(value, (1, "two"));
    }

    #[tokio::test]
    async fn all_preserves_order() {
        let queries = (0..5).map(|n| Query::sync(move || n * n)).collect();
        let values = Query::all(queries).run(&TokioEffect).await.unwrap();
        assert_eq!(values, vec![0, 1, 4, 9, 16]);
    }

    #[tokio::test]
    async fn failures_propagate_through_map_and_zip() {
        let failing = Query::from_future(async { Err::<i32, _>(anyhow!("backend down")) });
        let mapped = failing.map(|n| n + 1).zip(Query::sync(|| 0));
        let error = mapped.run(&TokioEffect).await.unwrap_err();
        assert!(error.to_string().contains("backend down"));
    }
}
