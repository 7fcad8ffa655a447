//! The contract a remote data source implements.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::key::Identity;
use crate::query::Query;

/// How individual calls against one source may be scheduled when the
/// interpreter cannot batch them further (for example, sub-batches produced
/// by [`DataSource::max_batch_size`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchExecution {
    /// Calls must not overlap.
    Sequentially,
    /// Calls may safely run concurrently.
    #[default]
    InParallel,
}

/// A capability that resolves identities to values.
///
/// Implementations describe *how* to fetch; the interpreter decides *when*,
/// deduplicating identities, batching per-source requests into `fetch_many`
/// calls, and running independent sources concurrently.
///
/// # Example
///
/// ```ignore
/// use fetch_flow::{DataSource, Query};
/// use std::collections::HashMap;
///
/// struct Users { client: ApiClient }
///
/// impl DataSource for Users {
///     type Id = u64;
///     type Value = User;
///
///     fn name(&self) -> &str {
///         "users"
///     }
///
///     fn fetch_one(&self, id: u64) -> Query<Option<User>> {
///         let client = self.client.clone();
///         Query::from_future(async move { client.user(id).await })
///     }
///
///     fn fetch_many(&self, ids: Vec<u64>) -> Query<HashMap<u64, User>> {
///         let client = self.client.clone();
///         Query::from_future(async move { client.users(&ids).await })
///     }
/// }
/// ```
pub trait DataSource: Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Stable name of this source within a run; namespaces the cache and
    /// keys batching. Two instances sharing a name must be interchangeable.
    fn name(&self) -> &str;

    /// Content-addressed key for `id` within this source's namespace.
    ///
    /// Must be deterministic and pure. Override to normalize ids that are
    /// distinct values but address the same item.
    fn identity(&self, id: &Self::Id) -> Identity {
        Identity::of(id)
    }

    /// Fetch a single value; `None` means "not found".
    fn fetch_one(&self, id: Self::Id) -> Query<Option<Self::Value>>;

    /// Fetch a batch of values in one call.
    ///
    /// `ids` is non-empty and deduplicated. The returned map contains only
    /// keys from `ids`; absent keys mean "not found". The default runs
    /// `fetch_one` per identity and assembles the map; sources with a real
    /// batch endpoint should override it.
    fn fetch_many(&self, ids: Vec<Self::Id>) -> Query<HashMap<Self::Id, Self::Value>> {
        let queries = ids
            .into_iter()
            .map(|id| self.fetch_one(id.clone()).map(move |value| (id, value)))
            .collect();
        Query::all(queries).map(|pairs| {
            pairs
                .into_iter()
                .filter_map(|(id, value)| value.map(|v| (id, v)))
                .collect()
        })
    }

    /// Scheduling hint for calls the interpreter could not batch together.
    fn batch_execution(&self) -> BatchExecution {
        BatchExecution::InParallel
    }

    /// Largest batch this source accepts in one `fetch_many` call; `None`
    /// means unbounded. Oversized batches are split into chunks and the
    /// chunks scheduled according to [`batch_execution`](Self::batch_execution).
    fn max_batch_size(&self) -> Option<usize> {
        None
    }
}
