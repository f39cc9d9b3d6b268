use super::{RejectedKeys, INTERNAL_KEY_TOKEN_TYPE};
use crate::config::EnforcerConfig;
use crate::context::{RequestContext, SecurityScheme};
use crate::error::AuthError;
use crate::logging::mask_token;
use crate::security::exchange::KeyExchangeClient;
use crate::security::extractor::{CredentialExtractor, CredentialKind};
use crate::security::jwt::ParsedToken;
use crate::security::pipeline::TokenPipeline;
use crate::security::cache::TtlLruCache;
use crate::security::restrictions::KeyRestrictions;
use crate::security::subscription::TokenFlow;
use crate::security::{AuthOutcome, Authenticator, CacheStats};
use std::sync::Arc;
use tracing::debug;

/// API keys in the API key header.
///
/// Signed keys are validated directly. Opaque keys are first checksum
/// verified and exchanged for a signed token through the
/// [`KeyExchangeClient`]; without one, opaque keys are rejected.
pub struct ApiKeyAuthenticator {
    header: String,
    extractor: CredentialExtractor,
    pipeline: Arc<TokenPipeline>,
    exchange: Option<KeyExchangeClient>,
    rejected: RejectedKeys,
    // Compiled restrictions keyed by token id, guarded by the raw key.
    restrictions: TtlLruCache<String, (String, Arc<KeyRestrictions>)>,
}

impl ApiKeyAuthenticator {
    pub const NAME: &'static str = "api_key";
    pub const PRIORITY: i32 = 30;

    pub fn new(
        config: &EnforcerConfig,
        pipeline: Arc<TokenPipeline>,
        exchange: Option<KeyExchangeClient>,
    ) -> Self {
        let clock = Arc::clone(pipeline.validator().clock());
        Self {
            header: config.api_key_header.clone(),
            extractor: CredentialExtractor::header_only(config.opaque_key_prefix.clone()),
            pipeline,
            exchange,
            rejected: RejectedKeys::new("api_key_rejected", &config.cache, Arc::clone(&clock)),
            restrictions: TtlLruCache::from_config("api_key_restrictions", &config.cache, clock),
        }
    }

    pub fn rejected_stats(&self) -> CacheStats {
        self.rejected.stats()
    }

    /// The key's restrictions, compiled on first use.
    fn restrictions(&self, parsed: &ParsedToken) -> Arc<KeyRestrictions> {
        let token_id = parsed.token_id();
        if let Some((raw, compiled)) = self.restrictions.get(&token_id) {
            if raw == parsed.raw {
                return compiled;
            }
        }
        let compiled = Arc::new(KeyRestrictions::parse(
            parsed.claim_str("permittedIP"),
            parsed.claim_str("permittedReferer"),
        ));
        self.restrictions
            .insert(token_id, (parsed.raw.clone(), Arc::clone(&compiled)));
        compiled
    }

    /// The signed form of the presented key.
    fn signed_key(&self, value: &str, kind: CredentialKind) -> Result<String, AuthError> {
        match (kind, &self.exchange) {
            (CredentialKind::SignedToken, _) => Ok(value.to_string()),
            (CredentialKind::OpaqueKey, Some(exchange)) => exchange.exchange(value),
            (CredentialKind::OpaqueKey, None) => {
                debug!(key = %mask_token(value), "opaque key presented but no exchange is configured");
                Err(AuthError::invalid_credentials())
            }
            (CredentialKind::Unknown, _) => Err(AuthError::invalid_credentials()),
        }
    }
}

impl Authenticator for ApiKeyAuthenticator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, req: &RequestContext) -> bool {
        if req.resource.security_disabled || !req.api.supports(SecurityScheme::ApiKey) {
            return false;
        }
        self.extractor.extract(req, &self.header).is_some_and(|c| {
            matches!(c.kind, CredentialKind::SignedToken | CredentialKind::OpaqueKey)
        })
    }

    fn authenticate(&self, req: &mut RequestContext) -> Result<AuthOutcome, AuthError> {
        let credential = self
            .extractor
            .extract(req, &self.header)
            .ok_or_else(AuthError::missing_credentials)?;
        let raw = self.signed_key(&credential.value, credential.kind)?;
        let parsed = ParsedToken::parse(&raw)?;

        if parsed.token_type() == Some(INTERNAL_KEY_TOKEN_TYPE) {
            debug!(key = %mask_token(&raw), "internal key presented as an API key");
            self.rejected.remember(parsed.token_id(), &raw);
            return Err(AuthError::invalid_credentials());
        }

        let token = self.rejected.validate(&self.pipeline, &parsed)?;
        self.restrictions(&token.parsed).check(req)?;
        let ctx = self
            .pipeline
            .authorize(req, &token, TokenFlow::ApiKey, Self::NAME)?;
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

    fn authenticator() -> ApiKeyAuthenticator {
        let config = EnforcerConfig::default();
        ApiKeyAuthenticator::new(&config, pipeline(&config, clock()), None)
    }

    fn request() -> RequestContext {
        let api = ApiDescriptor {
            security: vec![SecurityScheme::OAuth2, SecurityScheme::ApiKey],
            ..ApiDescriptor::new("PetStore", "1.0.0", "/petstore")
        };
        RequestContext::new(api, ResourceDescriptor::new(Method::GET, "/pets"))
    }

    #[test]
    fn test_can_handle_requires_api_key_scheme() {
        let auth = authenticator();
        assert!(auth.can_handle(&request().with_header("apikey", "a.b.c")));
        assert!(auth.can_handle(&request().with_header("apikey", "chp_abcdefgh")));
        assert!(!auth.can_handle(&request().with_header("apikey", "plain")));

        let mut req = request().with_header("apikey", "a.b.c");
        req.api.security = vec![SecurityScheme::OAuth2];
        assert!(!auth.can_handle(&req));
    }

    #[test]
    fn test_opaque_key_without_exchange_rejected() {
        let auth = authenticator();
        let mut req = request().with_header("apikey", "chp_abcdefghijkl");
        assert!(matches!(
            auth.authenticate(&mut req).unwrap_err(),
            AuthError::InvalidCredentials { .. }
        ));
    }

    #[test]
    fn test_internal_key_token_type_rejected() {
        let auth = authenticator();
        let raw = mint(json!({"iss": ISSUER, "jti": "k1", "token_type": "InternalKey", "exp": NOW + 60}));
        let mut req = request().with_header("apikey", raw);
        assert!(auth.authenticate(&mut req).is_err());
    }

    #[test]
    fn test_rejected_key_cache_is_per_raw_value() {
        let auth = authenticator();
        let expired = mint(json!({"iss": ISSUER, "jti": "k2", "exp": NOW - 600}));
        let mut req = request().with_header("apikey", expired.clone());
        assert!(auth.authenticate(&mut req).is_err());
        let parsed = ParsedToken::parse(&expired).unwrap();
        assert!(auth.rejected.is_rejected("k2", &expired));

        // Same id, different key material
        let rotated = mint(json!({"iss": ISSUER, "jti": "k2", "exp": NOW + 600}));
        assert!(!auth.rejected.is_rejected(&parsed.token_id(), &rotated));
    }

    #[test]
    fn test_restrictions_compiled_once_per_key() {
        let auth = authenticator();
        let raw = mint(json!({"iss": ISSUER, "jti": "k4", "exp": NOW + 60, "permittedReferer": "shop.example.com/*"}));
        for referer in ["shop.example.com/a", "shop.example.com/b"] {
            let mut req = request().with_header("apikey", raw.clone()).with_header("referer", referer);
            assert!(auth.authenticate(&mut req).is_ok());
        }
        let stats = auth.restrictions.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_ip_restriction() {
        let auth = authenticator();
        let raw = mint(json!({"iss": ISSUER, "jti": "k3", "exp": NOW + 60, "permittedIP": "10.0.0.0/8"}));
        let mut req = request().with_header("apikey", raw.clone()).with_peer_address("10.1.1.1");
        assert!(auth.authenticate(&mut req).is_ok());
        let mut req = request().with_header("apikey", raw).with_peer_address("192.168.1.1");
        assert_eq!(auth.authenticate(&mut req).unwrap_err().code(), 900908);
    }
}
