//! Fetch-Flow: data-fetch orchestration with automatic deduplication,
//! batching, and concurrency.
//!
//! This crate provides a small embedded language for expressing dependent
//! reads from heterogeneous remote data sources, together with an interpreter
//! that executes them in optimized rounds.
//!
//! # Key Features
//!
//! - **Deduplication**: each `(source, identity)` pair is fetched at most
//!   once per run; repeats are served from the cache
//! - **Batching**: independent requests against one source become a single
//!   `fetch_many` call
//! - **Concurrency**: independent requests against different sources run in
//!   parallel, scheduled by a pluggable [`Effect`] adapter
//! - **Structured execution log**: every run produces an [`Env`] recording,
//!   per round, what was requested, cached, and fetched
//! - **Scheduler-agnostic core**: program analysis is pure; only query
//!   execution suspends
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fetch_flow::{one, sequence, DataSource, FetchRuntime, Query};
//!
//! struct Users;
//!
//! impl DataSource for Users {
//!     type Id = u64;
//!     type Value = String;
//!
//!     fn name(&self) -> &str {
//!         "users"
//!     }
//!
//!     fn fetch_one(&self, id: u64) -> Query<Option<String>> {
//!         Query::from_future(async move { lookup_user(id).await })
//!     }
//! }
//!
//! let users = Arc::new(Users);
//! let program = sequence(vec![one(&users, 1), one(&users, 2), one(&users, 1)]);
//!
//! // One round, one batched call for ids [1, 2].
//! let names = FetchRuntime::new().run(program).await?;
//! ```
//!
//! # Composition
//!
//! [`Fetch::flat_map`] sequences dependent reads and introduces a round
//! boundary; [`Fetch::product`], [`map2`], [`sequence`], and [`traverse`]
//! combine independent reads and keep them eligible for the same round. The
//! distinction is what the interpreter's analysis runs on; collapsing
//! everything to `flat_map` would defeat batching.

mod cache;
mod effect;
mod env;
mod error;
mod fetch;
mod key;
mod query;
mod request;
mod runtime;
mod source;

pub use cache::{Cache, CacheSnapshot, CachedValue, InMemoryCache};
pub use effect::{Effect, EffectTask, SequentialEffect, TokioEffect};
pub use env::{Env, Round, RoundQuery, RoundStatus};
pub use error::FetchError;
pub use fetch::{many, map2, one, sequence, traverse, Fetch};
pub use key::{CacheKey, Identity};
pub use query::{ErasedValue, Query};
pub use runtime::FetchRuntime;
pub use source::{BatchExecution, DataSource};
