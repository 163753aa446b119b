//! AuthorizationPolicy CRD
//!
//! An AuthorizationPolicy carries Cedar policy text that is compiled and
//! served to the ext_authz request path.

use kube::{CustomResource, Resource};
use lattice_policy_cache::PolicyResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// AuthorizationPolicy defines request authorization rules in Cedar.
///
/// Compiled policies are evaluated in order of `namespace/name`.
///
/// Example:
/// ```yaml
/// apiVersion: lattice.dev/v1alpha1
/// kind: AuthorizationPolicy
/// metadata:
///   name: checkout-readers
///   namespace: payments
/// spec:
///   description: Allow the frontend to read checkout
///   policies: |
///     permit(
///       principal == Lattice::Service::"web/frontend",
///       action == Lattice::Action::"GET",
///       resource
///     );
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lattice.dev",
    version = "v1alpha1",
    kind = "AuthorizationPolicy",
    namespaced,
    shortname = "authzpolicy",
    printcolumn = r#"{"name":"Description","type":"string","jsonPath":".spec.description"}"#,
    printcolumn = r#"{"name":"Enabled","type":"boolean","jsonPath":".spec.enabled"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Human-readable description of what this policy does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Cedar policy text containing one or more statements
    pub policies: String,

    /// Whether this policy is enabled
    /// Disabled policies compile to an empty policy set
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PolicyResource for AuthorizationPolicy {
    fn revision(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_authorization_policy_yaml() {
        let yaml = r#"
apiVersion: lattice.dev/v1alpha1
kind: AuthorizationPolicy
metadata:
  name: admin-access
  namespace: default
  resourceVersion: "42"
spec:
  description: Allow admins full access
  policies: |
    permit(
      principal in Lattice::Group::"admins",
      action,
      resource
    );
"#;
        let policy: AuthorizationPolicy = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(
            policy.spec.description,
            Some("Allow admins full access".to_string())
        );
        assert!(policy.spec.policies.contains("admins"));
        assert!(policy.spec.enabled);
        assert_eq!(policy.revision(), Some("42"));
    }

    #[test]
    fn authorization_policy_disabled_yaml() {
        let yaml = r#"
apiVersion: lattice.dev/v1alpha1
kind: AuthorizationPolicy
metadata:
  name: legacy-policy
spec:
  enabled: false
  policies: |
    permit(principal, action, resource);
"#;
        let policy: AuthorizationPolicy = serde_yaml::from_str(yaml).expect("parse");
        assert!(!policy.spec.enabled);
        assert_eq!(policy.revision(), None);
    }

    #[test]
    fn crd_is_namespaced() {
        use kube::CustomResourceExt;

        let crd = AuthorizationPolicy::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.group, "lattice.dev");
    }
}
