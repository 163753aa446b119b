//! Cedar policy compilation
//!
//! Compiles AuthorizationPolicy resources into Cedar policy sets ready for
//! evaluation, with optional strict schema validation.

use std::sync::Arc;

use cedar_policy::{
    Authorizer, Entities, PolicySet, Request, Response, Schema, ValidationMode, Validator,
};
use lattice_policy_cache::{CompileError, PolicyCompiler, PolicyKey};
use tracing::{debug, warn};

use crate::crd::AuthorizationPolicy;
use crate::error::{AuthzError, Result};

/// A compiled AuthorizationPolicy
///
/// Immutable and cheap to clone. Evaluation has no side effects.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    key: PolicyKey,
    policy_set: Arc<PolicySet>,
    /// Shared with every policy from the same compiler
    authorizer: Arc<Authorizer>,
}

impl CompiledPolicy {
    /// Identity of the resource this policy was compiled from
    pub fn key(&self) -> &PolicyKey {
        &self.key
    }

    /// The compiled Cedar policy set
    pub fn policy_set(&self) -> &PolicySet {
        &self.policy_set
    }

    /// Evaluate a request against this policy
    pub fn is_authorized(&self, request: &Request, entities: &Entities) -> Response {
        self.authorizer
            .is_authorized(request, &self.policy_set, entities)
    }
}

/// Cedar policy compiler with optional schema validation
#[derive(Debug, Clone)]
pub struct CedarCompiler {
    /// Optional Cedar schema for validation
    schema: Option<Schema>,
    /// Cedar authorizer handed to compiled policies
    authorizer: Arc<Authorizer>,
}

impl Default for CedarCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl CedarCompiler {
    /// Create a new policy compiler without schema validation
    pub fn new() -> Self {
        Self {
            schema: None,
            authorizer: Arc::new(Authorizer::new()),
        }
    }

    /// Create a policy compiler with schema validation
    pub fn with_schema(schema: Schema) -> Self {
        Self {
            schema: Some(schema),
            ..Self::new()
        }
    }

    /// Create a policy compiler from Cedar schema text
    pub fn from_schema_text(text: &str) -> Result<Self> {
        let (schema, warnings) = Schema::from_cedarschema_str(text)
            .map_err(|e| AuthzError::configuration(format!("invalid Cedar schema: {}", e)))?;

        for warning in warnings {
            warn!(warning = %warning, "Cedar schema warning");
        }

        Ok(Self::with_schema(schema))
    }

    /// Compile Cedar policy text into a PolicySet
    ///
    /// Every parse error, or every schema validation error if a schema is
    /// configured, is reported separately.
    pub fn compile_text(
        &self,
        key: &PolicyKey,
        policy_text: &str,
    ) -> std::result::Result<PolicySet, Vec<CompileError>> {
        let policy_set: PolicySet = policy_text.parse().map_err(|e: cedar_policy::ParseErrors| {
            e.iter()
                .map(|err| CompileError::parse(err.to_string()))
                .collect::<Vec<_>>()
        })?;

        if let Some(schema) = &self.schema {
            let validation_result =
                Validator::new(schema.clone()).validate(&policy_set, ValidationMode::Strict);

            if !validation_result.validation_passed() {
                return Err(validation_result
                    .validation_errors()
                    .map(|e| CompileError::validation(e.to_string()))
                    .collect());
            }

            // Log warnings but don't fail
            for warning in validation_result.validation_warnings() {
                warn!(
                    key = %key,
                    warning = %warning,
                    "Cedar policy validation warning"
                );
            }
        }

        Ok(policy_set)
    }
}

impl PolicyCompiler<AuthorizationPolicy, CompiledPolicy> for CedarCompiler {
    fn compile(
        &self,
        key: &PolicyKey,
        resource: &AuthorizationPolicy,
    ) -> std::result::Result<CompiledPolicy, Vec<CompileError>> {
        let policy_set = if resource.spec.enabled {
            self.compile_text(key, &resource.spec.policies)?
        } else {
            debug!(key = %key, "AuthorizationPolicy disabled, compiling to empty policy set");
            PolicySet::new()
        };

        Ok(CompiledPolicy {
            key: key.clone(),
            policy_set: Arc::new(policy_set),
            authorizer: self.authorizer.clone(),
        })
    }
}
