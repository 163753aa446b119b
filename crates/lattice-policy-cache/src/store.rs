//! Compiled policy store
//!
//! Concurrent storage of compiled policies keyed by resource identity, guarded
//! by a single reader/writer lock.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

/// Identity of a policy resource
///
/// Ordered lexicographically over the full `namespace/name` string. This
/// ordering is the evaluation precedence handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PolicyKey(String);

impl PolicyKey {
    /// Create a key from an already-qualified identity string
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Create a key from a namespace and name
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self(format!("{}/{}", namespace, name))
    }

    /// The identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored policy with metadata
#[derive(Debug, Clone)]
struct PolicyEntry<P> {
    /// Compiled policy
    policy: P,
    /// Revision of the resource this policy was compiled from
    revision: Option<String>,
}

/// Concurrent policy store
///
/// Holds at most one compiled policy per identity. Mutations take the write
/// lock for an O(1) map operation; reads copy out under the read lock and do
/// any ordering work after releasing it.
#[derive(Debug)]
pub struct PolicyStore<P> {
    policies: RwLock<HashMap<PolicyKey, PolicyEntry<P>>>,
}

impl<P> Default for PolicyStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PolicyStore<P> {
    /// Create a new empty policy store
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the policy for an identity
    pub fn upsert(&self, key: PolicyKey, policy: P, revision: Option<&str>) {
        let entry = PolicyEntry {
            policy,
            revision: revision.map(str::to_string),
        };
        let replaced = self.policies.write().insert(key.clone(), entry).is_some();

        info!(
            key = %key,
            revision = ?revision,
            replaced,
            "Policy stored"
        );
    }

    /// Remove the policy for an identity
    ///
    /// Returns false if there was nothing to remove.
    pub fn remove(&self, key: &PolicyKey) -> bool {
        let removed = self.policies.write().remove(key).is_some();

        if removed {
            info!(key = %key, "Policy removed");
        } else {
            debug!(key = %key, "Policy already absent");
        }

        removed
    }

    /// Check if a policy exists for an identity
    pub fn contains(&self, key: &PolicyKey) -> bool {
        self.policies.read().contains_key(key)
    }

    /// Revision the stored policy was compiled from, if known
    pub fn revision(&self, key: &PolicyKey) -> Option<String> {
        self.policies
            .read()
            .get(key)
            .and_then(|entry| entry.revision.clone())
    }

    /// Identities with a stored policy, in no particular order
    pub fn keys(&self) -> Vec<PolicyKey> {
        self.policies.read().keys().cloned().collect()
    }

    /// Get the number of stored policies
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }
}

impl<P: Clone> PolicyStore<P> {
    #[cfg(test)]
    pub(crate) fn get(&self, key: &PolicyKey) -> Option<P> {
        self.policies.read().get(key).map(|entry| entry.policy.clone())
    }

    /// All stored policies ordered by ascending identity
    ///
    /// The result reflects the store at a single instant. Returns an empty
    /// vector when the store is empty.
    pub fn sorted_values(&self) -> Vec<P> {
        let mut pairs: Vec<(PolicyKey, P)> = {
            let policies = self.policies.read();
            policies
                .iter()
                .map(|(key, entry)| (key.clone(), entry.policy.clone()))
                .collect()
        };

        // Keys are unique, so an unstable sort is deterministic
        pairs.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        pairs.into_iter().map(|(_, policy)| policy).collect()
    }
}
