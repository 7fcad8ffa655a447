//! Fetch programs: composable descriptions of dependent reads.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;

use crate::cache::CacheSnapshot;
use crate::error::FetchError;
use crate::query::{reify, ErasedValue};
use crate::request::{combine, FetchQuery, SourceRequest};
use crate::source::DataSource;

pub(crate) type Mapper = Box<dyn FnOnce(ErasedValue) -> ErasedValue + Send>;
pub(crate) type Binder = Box<dyn FnOnce(ErasedValue) -> FetchNode + Send>;

/// One node of a fetch program.
///
/// `Map`, `Product`, and `FlatMap` are the composition spine; the leaves are
/// resolved values, failures, and source requests. `Concurrent` is a
/// pre-planned round of combined batches introduced by [`Fetch::join`]; it
/// resolves to the cache snapshot taken after the round.
pub(crate) enum FetchNode {
    Pure(ErasedValue),
    Error(FetchError),
    Request(Arc<dyn FetchQuery>),
    Concurrent(Vec<Arc<dyn FetchQuery>>),
    Map(Box<FetchNode>, Mapper),
    Product(Box<FetchNode>, Box<FetchNode>),
    FlatMap(Box<FetchNode>, Binder),
}

/// Step the head of a program as far as pure rewriting allows.
///
/// Resolved inner nodes flow through `Map`/`Product` and into `FlatMap`
/// continuations; failures short-circuit, discarding the other side of a
/// product. Stops at the first unresolved request.
pub(crate) fn advance(node: FetchNode) -> FetchNode {
    match node {
        FetchNode::Map(inner, f) => match advance(*inner) {
            FetchNode::Pure(value) => FetchNode::Pure(f(value)),
            FetchNode::Error(error) => FetchNode::Error(error),
            pending => FetchNode::Map(Box::new(pending), f),
        },
        FetchNode::FlatMap(inner, bind) => match advance(*inner) {
            FetchNode::Pure(value) => advance(bind(value)),
            FetchNode::Error(error) => FetchNode::Error(error),
            pending => FetchNode::FlatMap(Box::new(pending), bind),
        },
        FetchNode::Product(left, right) => match (advance(*left), advance(*right)) {
            (FetchNode::Pure(left), FetchNode::Pure(right)) => {
                FetchNode::Pure(Box::new((left, right)) as ErasedValue)
            }
            (FetchNode::Error(error), _) | (_, FetchNode::Error(error)) => {
                FetchNode::Error(error)
            }
            (left, right) => FetchNode::Product(Box::new(left), Box::new(right)),
        },
        leaf => leaf,
    }
}

/// Collect every request at the head of the program that could run now.
///
/// The walk never crosses a `FlatMap` continuation: whatever follows a bind
/// depends on the bound value and belongs to a later round.
pub(crate) fn extract(node: &FetchNode) -> Vec<Arc<dyn FetchQuery>> {
    match node {
        FetchNode::Pure(_) | FetchNode::Error(_) => Vec::new(),
        FetchNode::Request(request) => vec![request.clone()],
        FetchNode::Concurrent(batches) => batches.clone(),
        FetchNode::Map(inner, _) | FetchNode::FlatMap(inner, _) => extract(inner),
        FetchNode::Product(left, right) => {
            let mut requests = extract(left);
            requests.extend(extract(right));
            requests
        }
    }
}

/// Replace every request whose identities are all cached with its value.
///
/// A structure-preserving rewrite: composition nodes are rebuilt around their
/// simplified children, and unresolved requests are left in place.
pub(crate) fn simplify(node: FetchNode, cache: &CacheSnapshot) -> FetchNode {
    match node {
        FetchNode::Request(request) => {
            if !request.fulfilled_by(cache.as_ref()) {
                return FetchNode::Request(request);
            }
            match request.read(cache.as_ref()) {
                Some(value) => FetchNode::Pure(value),
                // Every identity is cached but one has the wrong value type:
                // two sources share a name without sharing a value type.
                None => FetchNode::Error(FetchError::unhandled(anyhow!(
                    "cached value for source {} does not match its declared value type",
                    request.source_name()
                ))),
            }
        }
        FetchNode::Concurrent(batches) => {
            if batches
                .iter()
                .all(|batch| batch.fulfilled_by(cache.as_ref()))
            {
                FetchNode::Pure(Box::new(cache.clone()) as ErasedValue)
            } else {
                FetchNode::Concurrent(batches)
            }
        }
        FetchNode::Map(inner, f) => FetchNode::Map(Box::new(simplify(*inner, cache)), f),
        FetchNode::FlatMap(inner, bind) => {
            FetchNode::FlatMap(Box::new(simplify(*inner, cache)), bind)
        }
        FetchNode::Product(left, right) => FetchNode::Product(
            Box::new(simplify(*left, cache)),
            Box::new(simplify(*right, cache)),
        ),
        leaf => leaf,
    }
}

/// Pre-plan a concurrent round across two independent programs.
///
/// The combined batch set of both heads becomes a `Concurrent` node bound to
/// a continuation that simplifies both sides against the post-round snapshot
/// and recurses. The snapshot contains everything the round requested, so
/// each recursion strictly descends past the work it just scheduled; once
/// neither side has runnable requests the pair degenerates to a product.
fn join_nodes(left: FetchNode, right: FetchNode) -> FetchNode {
    let left = advance(left);
    let right = advance(right);
    if matches!(left, FetchNode::Error(_)) || matches!(right, FetchNode::Error(_)) {
        return FetchNode::Product(Box::new(left), Box::new(right));
    }

    let mut requests = extract(&left);
    requests.extend(extract(&right));
    let batches = combine(requests);
    if batches.is_empty() {
        return FetchNode::Product(Box::new(left), Box::new(right));
    }

    FetchNode::FlatMap(
        Box::new(FetchNode::Concurrent(batches)),
        Box::new(move |snapshot| {
            let cache = reify::<CacheSnapshot>(snapshot);
            join_nodes(simplify(left, &cache), simplify(right, &cache))
        }),
    )
}

/// Re-type the erased pair produced by a product-shaped node.
fn pair_node<A: Send + 'static, B: Send + 'static>(node: FetchNode) -> FetchNode {
    FetchNode::Map(
        Box::new(node),
        Box::new(|pair| {
            let (left, right) = reify::<(ErasedValue, ErasedValue)>(pair);
            Box::new((reify::<A>(left), reify::<B>(right))) as ErasedValue
        }),
    )
}

/// A composable description of a dependent computation over data sources.
///
/// Programs are built from leaves ([`Fetch::pure`], [`Fetch::fail`], [`one`],
/// [`many`]) and combined two ways:
///
/// - **dependently** with [`Fetch::flat_map`]: the continuation needs the
///   value, so a round boundary sits between the two;
/// - **independently** with [`Fetch::product`] (or [`map2`], [`sequence`],
///   [`traverse`], [`Fetch::join`]): the interpreter discovers both sides in
///   the same round, deduplicates and batches their requests per source, and
///   runs them concurrently.
///
/// A program does nothing until handed to a
/// [`FetchRuntime`](crate::FetchRuntime). Like a future, it describes one
/// execution; rebuilding it (construction is pure and cheap) yields the same
/// results again, modulo cache hits.
///
/// # Example
///
/// ```ignore
/// use fetch_flow::{one, FetchRuntime};
///
/// let post = one(&posts, post_id)
///     .flat_map(move |post| one(&users, post.author).map(|author| (post, author)));
/// let (post, author) = FetchRuntime::new().run(post).await?;
/// ```
pub struct Fetch<A> {
    pub(crate) node: FetchNode,
    marker: PhantomData<fn() -> A>,
}

impl<A: Send + 'static> Fetch<A> {
    pub(crate) fn from_node(node: FetchNode) -> Self {
        Self {
            node,
            marker: PhantomData,
        }
    }

    /// A program that trivially yields `value`.
    pub fn pure(value: A) -> Self {
        Self::from_node(FetchNode::Pure(Box::new(value)))
    }

    /// A program that immediately fails with `cause`.
    pub fn fail(cause: impl Into<anyhow::Error>) -> Self {
        Self::from_node(FetchNode::Error(FetchError::unhandled(cause)))
    }

    /// Transform the result.
    pub fn map<B: Send + 'static>(
        self,
        f: impl FnOnce(A) -> B + Send + 'static,
    ) -> Fetch<B> {
        Fetch::from_node(FetchNode::Map(
            Box::new(self.node),
            Box::new(move |value| Box::new(f(reify::<A>(value))) as ErasedValue),
        ))
    }

    /// Sequence a dependent computation: `f` runs only after this program's
    /// value is available, which puts a round boundary between the two.
    pub fn flat_map<B: Send + 'static>(
        self,
        f: impl FnOnce(A) -> Fetch<B> + Send + 'static,
    ) -> Fetch<B> {
        Fetch::from_node(FetchNode::FlatMap(
            Box::new(self.node),
            Box::new(move |value| f(reify::<A>(value)).node),
        ))
    }

    /// Pair with an independent program, preserving that independence so the
    /// interpreter can batch and parallelize across both sides.
    pub fn product<B: Send + 'static>(self, other: Fetch<B>) -> Fetch<(A, B)> {
        Fetch::from_node(pair_node::<A, B>(FetchNode::Product(
            Box::new(self.node),
            Box::new(other.node),
        )))
    }

    /// An optimized [`product`](Self::product) that eagerly plans the first
    /// concurrent round across both sides.
    ///
    /// Semantically identical to `product`; the combined round is computed at
    /// construction instead of being discovered by the interpreter.
    pub fn join<B: Send + 'static>(self, other: Fetch<B>) -> Fetch<(A, B)> {
        Fetch::from_node(pair_node::<A, B>(join_nodes(self.node, other.node)))
    }
}

/// Request one value from `source`; absence fails the program with
/// [`FetchError::NotFound`].
pub fn one<S: DataSource>(source: &Arc<S>, id: S::Id) -> Fetch<S::Value> {
    Fetch::from_node(FetchNode::Request(Arc::new(SourceRequest::one(
        source.clone(),
        id,
    ))))
}

/// Request one value per identity from `source`, preserving input order.
///
/// Duplicate identities are fetched once and yielded at every position they
/// occupy. An empty id list resolves to an empty vector without touching the
/// source. Absent identities fail the program with
/// [`FetchError::MissingIdentities`].
pub fn many<S: DataSource>(source: &Arc<S>, ids: Vec<S::Id>) -> Fetch<Vec<S::Value>> {
    if ids.is_empty() {
        return Fetch::pure(Vec::new());
    }
    Fetch::from_node(FetchNode::Request(Arc::new(SourceRequest::many(
        source.clone(),
        ids,
    ))))
}

/// Combine two independent programs with `f`.
pub fn map2<A, B, C>(
    left: Fetch<A>,
    right: Fetch<B>,
    f: impl FnOnce(A, B) -> C + Send + 'static,
) -> Fetch<C>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    left.product(right).map(|(a, b)| f(a, b))
}

/// Turn a vector of independent programs into a program of a vector.
///
/// All requests across the inputs belong to the same round.
pub fn sequence<A: Send + 'static>(fetches: Vec<Fetch<A>>) -> Fetch<Vec<A>> {
    fetches
        .into_iter()
        .fold(Fetch::pure(Vec::new()), |collected, fetch| {
            map2(collected, fetch, |mut values, value| {
                values.push(value);
                values
            })
        })
}

/// Map each item to a program and collect the results in input order.
pub fn traverse<T, A: Send + 'static>(
    items: Vec<T>,
    f: impl FnMut(T) -> Fetch<A>,
) -> Fetch<Vec<A>> {
    sequence(items.into_iter().map(f).collect())
}
