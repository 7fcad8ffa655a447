//! Error taxonomy for fetch execution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::env::Env;
use crate::key::Identity;

/// Errors raised while executing a fetch program.
///
/// Every variant carries the [`Env`] snapshot at the moment of failure,
/// including the round that was being attempted. Errors are not retried by
/// the interpreter; callers may match on the kind and run a fallback program.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// A single-identity request came back absent.
    NotFound {
        env: Env,
        source: Arc<str>,
        identity: Identity,
    },

    /// A batched request came back without some of its identities.
    MissingIdentities {
        env: Env,
        missing: HashMap<String, Vec<Identity>>,
    },

    /// Any other failure propagated from a source's query, including
    /// timeouts, wrapping the underlying error.
    UnhandledException { env: Env, cause: Arc<anyhow::Error> },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NotFound {
                source, identity, ..
            } => write!(f, "identity {identity} was not found in source {source}"),
            FetchError::MissingIdentities { missing, .. } => {
                write!(
                    f,
                    "sources returned partial batches: {}",
                    describe_missing(missing)
                )
            }
            FetchError::UnhandledException { cause, .. } => {
                write!(f, "unhandled source failure: {cause}")
            }
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub(crate) fn unhandled(cause: impl Into<anyhow::Error>) -> Self {
        FetchError::UnhandledException {
            env: Env::default(),
            cause: Arc::new(cause.into()),
        }
    }

    /// The execution log at the moment of failure.
    pub fn env(&self) -> &Env {
        match self {
            FetchError::NotFound { env, .. }
            | FetchError::MissingIdentities { env, .. }
            | FetchError::UnhandledException { env, .. } => env,
        }
    }

    pub(crate) fn with_env(self, env: Env) -> Self {
        match self {
            FetchError::NotFound {
                source, identity, ..
            } => FetchError::NotFound {
                env,
                source,
                identity,
            },
            FetchError::MissingIdentities { missing, .. } => {
                FetchError::MissingIdentities { env, missing }
            }
            FetchError::UnhandledException { cause, .. } => {
                FetchError::UnhandledException { env, cause }
            }
        }
    }
}

fn describe_missing(missing: &HashMap<String, Vec<Identity>>) -> String {
    let mut parts: Vec<String> = missing
        .iter()
        .map(|(source, identities)| {
            let ids = identities
                .iter()
                .map(|identity| identity.repr().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{source} -> [{ids}]")
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_source_and_identity() {
        let error = FetchError::NotFound {
            env: Env::default(),
            source: Arc::from("users"),
            identity: Identity::of(&7u32),
        };
        assert_eq!(
            error.to_string(),
            "identity 7 was not found in source users"
        );
    }

    #[test]
    fn missing_identities_lists_sources_deterministically() {
        let mut missing = HashMap::new();
        missing.insert("users".to_string(), vec![Identity::of(&1u32)]);
        missing.insert("posts".to_string(), vec![Identity::of(&2u32)]);
        let error = FetchError::MissingIdentities {
            env: Env::default(),
            missing,
        };
        assert_eq!(
            error.to_string(),
            "sources returned partial batches: posts -> [2]; users -> [1]"
        );
    }

    #[test]
    fn unhandled_shows_the_cause() {
        let error = FetchError::unhandled(anyhow::anyhow!("connection reset"));
        assert_eq!(
            error.to_string(),
            "unhandled source failure: connection reset"
        );
    }
}
