//! Scope authorization.

use crate::context::ResourceDescriptor;
use crate::error::AuthError;
use std::collections::BTreeSet;
use tracing::debug;

/// Issuer suffix of keys minted by the developer portal's "try it" console.
pub const DEV_PORTAL_TEST_KEY_SUFFIX: &str = "/api/am/devportal/v2/apis/test-key";

/// Whether an API key was issued for the developer portal test console.
pub fn is_dev_portal_test_key(issuer: &str) -> bool {
    issuer.is_empty() || issuer.ends_with(DEV_PORTAL_TEST_KEY_SUFFIX)
}

/// Checks a token's granted scopes against a resource's required scopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeAuthorizer;

impl ScopeAuthorizer {
    /// Authorized iff the resource requires nothing or `granted` contains every required scope.
    pub fn authorize(&self, resource: &ResourceDescriptor, granted: &BTreeSet<String>) -> Result<(), AuthError> {
        let missing: Vec<&String> = resource
            .scopes
            .iter()
            .filter(|s| !granted.contains(s.as_str()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        debug!(
            resource = %resource.path,
            method = %resource.method,
            missing = ?missing,
            "required scopes not granted"
        );
        Err(AuthError::invalid_scope(&resource.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn resource(scopes: &[&str]) -> ResourceDescriptor {
        ResourceDescriptor {
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ..ResourceDescriptor::new(Method::GET, "/pets")
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_requirement_always_passes() {
        assert!(ScopeAuthorizer.authorize(&resource(&[]), &set(&[])).is_ok());
    }

    #[test]
    fn test_superset_passes_subset_fails() {
        let r = resource(&["read", "write"]);
        assert!(ScopeAuthorizer.authorize(&r, &set(&["read", "write"])).is_ok());
        assert!(ScopeAuthorizer.authorize(&r, &set(&["read", "write", "admin"])).is_ok());
        let err = ScopeAuthorizer.authorize(&r, &set(&["read"])).unwrap_err();
        assert_eq!(err.code(), 900910);
        assert!(err.to_string().contains("/pets"));
    }

    #[test]
    fn test_no_partial_matching() {
        let r = resource(&["pets:read"]);
        assert!(ScopeAuthorizer.authorize(&r, &set(&["pets"])).is_err());
        assert!(ScopeAuthorizer.authorize(&r, &set(&["pets:read:all"])).is_err());
    }

    #[test]
    fn test_dev_portal_test_key() {
        assert!(is_dev_portal_test_key(""));
        assert!(is_dev_portal_test_key(
            "https://apim.example.com/api/am/devportal/v2/apis/test-key"
        ));
        assert!(!is_dev_portal_test_key("https://idp.example.com/oauth2/token"));
    }
}
