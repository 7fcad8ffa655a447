//! The append-only execution log.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::Identity;

/// Execution log of one run: one entry per completed round.
///
/// Attached to every [`FetchError`](crate::FetchError) as a snapshot of the
/// state at the moment of failure, and returned by
/// [`FetchRuntime::run_env`](crate::FetchRuntime::run_env) /
/// [`run_fetch`](crate::FetchRuntime::run_fetch) for observability and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Env {
    rounds: Vec<Round>,
}

impl Env {
    /// The rounds executed so far, in order.
    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub(crate) fn record(&mut self, round: Round) {
        self.rounds.push(round);
    }
}

/// Outcome of one interpreter round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Completed,
    Failed,
}

/// One interpreter round: the combined per-source requests it examined, how
/// each split between cache and source, and how long execution took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub queries: Vec<RoundQuery>,
    pub status: RoundStatus,
    pub duration: Duration,
}

impl Round {
    /// Total identities fetched from sources this round.
    pub fn fetched_count(&self) -> usize {
        self.queries.iter().map(|query| query.fetched.len()).sum()
    }

    /// Total identities served from the cache this round.
    pub fn cached_count(&self) -> usize {
        self.queries.iter().map(|query| query.cached.len()).sum()
    }
}

/// One combined request within a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundQuery {
    /// Source the request was addressed to.
    pub source: Arc<str>,
    /// Deduplicated identities the request addressed.
    pub requested: Vec<Identity>,
    /// Subset of `requested` already present in the cache.
    pub cached: Vec<Identity>,
    /// Subset of `requested` sent to the source.
    pub fetched: Vec<Identity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sum_across_queries() {
        let round = Round {
            queries: vec![
                RoundQuery {
                    source: Arc::from("users"),
                    requested: vec![Identity::of(&1u32), Identity::of(&2u32)],
                    cached: vec![Identity::of(&1u32)],
                    fetched: vec![Identity::of(&2u32)],
                },
                RoundQuery {
                    source: Arc::from("posts"),
                    requested: vec![Identity::of(&9u32)],
                    cached: vec![],
                    fetched: vec![Identity::of(&9u32)],
                },
            ],
            status: RoundStatus::Completed,
            duration: Duration::ZERO,
        };
        assert_eq!(round.fetched_count(), 2);
        assert_eq!(round.cached_count(), 1);
    }

    #[test]
    fn env_serializes_for_external_tooling() {
        let mut env = Env::default();
        env.record(Round {
            queries: vec![RoundQuery {
                source: Arc::from("users"),
                requested: vec![Identity::of(&1u32)],
                cached: vec![],
                fetched: vec![Identity::of(&1u32)],
            }],
            status: RoundStatus::Completed,
            duration: Duration::from_millis(3),
        });

        let json = serde_json::to_string(&env).unwrap();
        let parsed: Env = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rounds().len(), 1);
        assert_eq!(parsed.rounds()[0].fetched_count(), 1);
        assert_eq!(parsed.rounds()[0].queries[0].source.as_ref(), "users");
    }
}
