use super::RejectedKeys;
use crate::config::EnforcerConfig;
use crate::context::{ApplicationIdentity, AuthenticationContext, RequestContext, UNLIMITED_TIER};
use crate::error::AuthError;
use crate::security::extractor::{CredentialExtractor, CredentialKind};
use crate::security::jwt::ParsedToken;
use crate::security::pipeline::TokenPipeline;
use crate::security::subscription::{anonymous_application_uuid, TokenFlow};
use crate::security::{AuthOutcome, Authenticator, CacheStats};
use std::sync::Arc;
use tracing::debug;

/// `token_type` claim value identifying internal keys.
pub const INTERNAL_KEY_TOKEN_TYPE: &str = "InternalKey";
/// Application name reported for internal key calls.
pub const INTERNAL_KEY_APPLICATION: &str = "internal-key-app";

/// Internal (test console) keys in the internal key header.
///
/// A signed token in this header that is not an internal key yields
/// [`AuthOutcome::Unauthenticated`] instead of an error.
pub struct InternalKeyAuthenticator {
    header: String,
    extractor: CredentialExtractor,
    pipeline: Arc<TokenPipeline>,
    rejected: RejectedKeys,
}

impl InternalKeyAuthenticator {
    pub const NAME: &'static str = "internal_key";
    pub const PRIORITY: i32 = -10;

    pub fn new(config: &EnforcerConfig, pipeline: Arc<TokenPipeline>) -> Self {
        let clock = Arc::clone(pipeline.validator().clock());
        Self {
            header: config.internal_key_header.clone(),
            extractor: CredentialExtractor::header_only(config.opaque_key_prefix.clone()),
            pipeline,
            rejected: RejectedKeys::new("internal_key_rejected", &config.cache, clock),
        }
    }

    pub fn rejected_stats(&self) -> CacheStats {
        self.rejected.stats()
    }
}

impl Authenticator for InternalKeyAuthenticator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, req: &RequestContext) -> bool {
        !req.resource.security_disabled
            && self
                .extractor
                .extract(req, &self.header)
                .is_some_and(|c| c.kind == CredentialKind::SignedToken)
    }

    fn authenticate(&self, req: &mut RequestContext) -> Result<AuthOutcome, AuthError> {
        let credential = self
            .extractor
            .extract(req, &self.header)
            .filter(|c| c.kind == CredentialKind::SignedToken)
            .ok_or_else(AuthError::missing_credentials)?;
        let parsed = ParsedToken::parse(&credential.value)?;
        if parsed.token_type() != Some(INTERNAL_KEY_TOKEN_TYPE) {
            debug!(token_type = ?parsed.token_type(), "not an internal key");
            return Ok(AuthOutcome::Unauthenticated(
                AuthenticationContext::unauthenticated(req, Self::NAME),
            ));
        }

        let token = self.rejected.validate(&self.pipeline, &parsed)?;
        let mut ctx = self
            .pipeline
            .authorize(req, &token, TokenFlow::InternalKey, Self::NAME)?;
        let uuid = anonymous_application_uuid(INTERNAL_KEY_APPLICATION);
        ctx.application = ApplicationIdentity {
            id: uuid.clone(),
            uuid,
            name: INTERNAL_KEY_APPLICATION.to_string(),
            owner: ctx.username.clone(),
            tier: UNLIMITED_TIER.to_string(),
        };
        ctx.tier = UNLIMITED_TIER.to_string();
        Ok(AuthOutcome::Authenticated(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{clock, mint, pipeline, ISSUER, NOW};
    use super::*;
    use crate::context::{ApiDescriptor, ResourceDescriptor};
    use http::Method;
    use serde_json::json;

    fn authenticator() -> InternalKeyAuthenticator {
        let config = EnforcerConfig::default();
        InternalKeyAuthenticator::new(&config, pipeline(&config, clock()))
    }

    fn request(key: &str) -> RequestContext {
        RequestContext::new(
            ApiDescriptor::new("PetStore", "1.0.0", "/petstore"),
            ResourceDescriptor::new(Method::GET, "/pets"),
        )
        .with_header("internal-key", key)
    }

    #[test]
    fn test_wrong_token_type_soft_fails() {
        let auth = authenticator();
        let raw = mint(json!({"iss": ISSUER, "jti": "i1", "exp": NOW + 60}));
        let mut req = request(&raw);
        assert!(auth.can_handle(&req));
        let outcome = auth.authenticate(&mut req).unwrap();
        assert!(!outcome.is_authenticated());
        assert_eq!(outcome.context().authenticator, "internal_key");
    }

    #[test]
    fn test_internal_key_context() {
        let auth = authenticator();
        let raw = mint(json!({
            "iss": ISSUER, "sub": "admin", "jti": "i2", "exp": NOW + 60,
            "token_type": "InternalKey", "keytype": "PRODUCTION"
        }));
        let outcome = auth.authenticate(&mut request(&raw)).unwrap();
        assert!(outcome.is_authenticated());
        let ctx = outcome.into_context();
        assert_eq!(ctx.application.name, INTERNAL_KEY_APPLICATION);
        assert_eq!(ctx.tier, UNLIMITED_TIER);
    }

    #[test]
    fn test_expired_internal_key_rejected() {
        let auth = authenticator();
        let raw = mint(json!({"iss": ISSUER, "jti": "i3", "exp": NOW - 600, "token_type": "InternalKey"}));
        assert!(auth.authenticate(&mut request(&raw)).is_err());
        assert!(auth.rejected.is_rejected("i3", &raw));
    }
}
