//! Kubernetes-backed policy source

use async_trait::async_trait;
use kube::{Api, Client};
use lattice_policy_cache::{FetchError, PolicyKey, PolicySource};
use tracing::debug;

use crate::crd::AuthorizationPolicy;

/// Fetches AuthorizationPolicy resources from the Kubernetes API
///
/// Identities are `namespace/name`. A 404 is reported as absence.
#[derive(Clone)]
pub struct KubePolicySource {
    client: Client,
}

impl KubePolicySource {
    /// Create a source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PolicySource<AuthorizationPolicy> for KubePolicySource {
    async fn fetch(&self, key: &PolicyKey) -> Result<Option<AuthorizationPolicy>, FetchError> {
        let (namespace, name) = split_key(key)
            .ok_or_else(|| FetchError::new(key.clone(), "identity is not namespace/name"))?;

        let api: Api<AuthorizationPolicy> = Api::namespaced(self.client.clone(), namespace);
        let policy = api
            .get_opt(name)
            .await
            .map_err(|e| FetchError::new(key.clone(), e.to_string()))?;

        if policy.is_none() {
            debug!(key = %key, "AuthorizationPolicy not found");
        }

        Ok(policy)
    }
}

/// Split a `namespace/name` identity
pub fn split_key(key: &PolicyKey) -> Option<(&str, &str)> {
    key.as_str()
        .split_once('/')
        .filter(|(namespace, name)| !namespace.is_empty() && !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key() {
        let key = PolicyKey::namespaced("payments", "checkout");
        assert_eq!(split_key(&key), Some(("payments", "checkout")));
    }

    #[test]
    fn test_split_key_rejects_unqualified() {
        assert_eq!(split_key(&PolicyKey::new("checkout")), None);
        assert_eq!(split_key(&PolicyKey::new("/checkout")), None);
        assert_eq!(split_key(&PolicyKey::new("payments/")), None);
    }
}
