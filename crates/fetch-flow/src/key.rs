//! Key types for cache addressing.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Content-addressed key for one item within a data source's namespace.
///
/// An identity is derived from the user's id type: a hash digest for fast
/// comparison plus a debug representation for error messages and logs.
/// Equality requires both to match, so a digest collision between ids with
/// different representations does not alias cache entries.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    digest: u64,
    repr: Arc<str>,
}

impl Identity {
    /// Derive an identity from any hashable, debuggable id.
    ///
    /// Deterministic within a process: the same id always produces the same
    /// identity, which is what makes identities usable as cache addresses.
    pub fn of<I: Hash + fmt::Debug>(id: &I) -> Self {
        let mut hasher = ahash::AHasher::default();
        id.hash(&mut hasher);
        Self {
            digest: hasher.finish(),
            repr: Arc::from(format!("{id:?}")),
        }
    }

    /// Debug representation of the originating id.
    pub fn repr(&self) -> &str {
        &self.repr
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr)
    }
}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.repr == other.repr
    }
}

impl Eq for Identity {}

/// Global cache key: a source name paired with an identity in that source's
/// namespace.
///
/// Two source instances sharing a name share a namespace, so they must be
/// interchangeable for caching purposes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    source: Arc<str>,
    identity: Identity,
}

impl CacheKey {
    pub fn new(source: Arc<str>, identity: Identity) -> Self {
        Self { source, identity }
    }

    /// Name of the source namespace this key belongs to.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The identity within the source namespace.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic() {
        assert_eq!(Identity::of(&42u32), Identity::of(&42u32));
        assert_eq!(Identity::of(&"user-7"), Identity::of(&"user-7"));
    }

    #[test]
    fn distinct_ids_produce_distinct_identities() {
        assert_ne!(Identity::of(&1u32), Identity::of(&2u32));
    }

    #[test]
    fn identity_displays_the_debug_repr() {
        assert_eq!(Identity::of(&3u32).to_string(), "3");
        assert_eq!(Identity::of(&"a").to_string(), "\"a\"");
    }

    #[test]
    fn cache_keys_namespace_by_source() {
        let a = CacheKey::new(Arc::from("users"), Identity::of(&1u32));
        let b = CacheKey::new(Arc::from("posts"), Identity::of(&1u32));
        assert_ne!(a, b);
        assert_eq!(a.source(), "users");
        assert_eq!(format!("{a:?}"), "users/1");
    }
}
