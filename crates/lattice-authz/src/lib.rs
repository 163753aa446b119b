//! AuthorizationPolicy controller for Lattice
//!
//! Watches `AuthorizationPolicy` resources, compiles their Cedar text, and
//! keeps a [`lattice_policy_cache::PolicyCache`] current. An ext_authz server
//! reads the ordered policy set through [`AuthzPolicyCache::provider`].
//!
//! ```text
//! watcher ─► Dispatcher ─► Reconciler ─► KubePolicySource (get)
//!                              │
//!                              └────────► CedarCompiler ─► PolicyStore
//! ```

#![deny(missing_docs)]

pub mod compiler;
pub mod controller;
pub mod crd;
pub mod error;
pub mod retry;
pub mod source;
pub mod telemetry;

pub use compiler::{CedarCompiler, CompiledPolicy};
pub use controller::{AuthzPolicyCache, DispatchConfig, Dispatcher};
pub use crd::{AuthorizationPolicy, AuthorizationPolicySpec};
pub use error::{AuthzError, Result};
pub use source::KubePolicySource;
