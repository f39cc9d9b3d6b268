//! Environment and deployment-type enforcement.

use crate::config::EnvironmentConfig;
use crate::context::{ApiDescriptor, KeyType};
use crate::error::AuthError;
use crate::security::issuer::IssuerPolicy;
use tracing::{debug, warn};

/// Checks issuer environment allow-lists and token key type against deployment type.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentEnforcer {
    relaxed: bool,
    allowed_organizations: Option<Vec<String>>,
}

impl EnvironmentEnforcer {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            relaxed: config.relaxed,
            allowed_organizations: config.allowed_organizations.clone(),
        }
    }

    /// The issuer must allow the environment the API is deployed to.
    pub fn check_issuer(&self, issuer: &IssuerPolicy, api: &ApiDescriptor) -> Result<(), AuthError> {
        if issuer.allows_environment(&api.environment) {
            return Ok(());
        }
        debug!(
            issuer = %issuer.name,
            environment = %api.environment,
            "issuer not allowed in this environment"
        );
        Err(AuthError::invalid_environment())
    }

    /// The token's key type must match the API's deployment type.
    ///
    /// With relaxed enforcement, a production token may call a sandbox
    /// deployment when the organization is permitted.
    pub fn check_key_type(&self, key_type: KeyType, api: &ApiDescriptor) -> Result<(), AuthError> {
        if key_type == api.deployment_type {
            return Ok(());
        }
        let production_on_non_production =
            key_type == KeyType::Production && api.deployment_type != KeyType::Production;
        let organization_allowed = match &self.allowed_organizations {
            None => true,
            Some(orgs) => orgs.iter().any(|o| *o == api.organization_id),
        };
        if self.relaxed && production_on_non_production && organization_allowed {
            warn!(
                api = %api.name,
                organization = %api.organization_id,
                "deprecated: production key used against a non-production deployment"
            );
            return Ok(());
        }
        debug!(
            key_type = key_type.as_str(),
            deployment_type = api.deployment_type.as_str(),
            "key type does not match deployment type"
        );
        Err(AuthError::invalid_environment())
    }
}
