use crate::config::EnforcerConfig;
use crate::context::{RequestContext, SecurityScheme};
use crate::error::AuthError;
use crate::security::extractor::{CredentialExtractor, CredentialKind};
use crate::security::pipeline::TokenPipeline;
use crate::security::subscription::TokenFlow;
use crate::security::{AuthOutcome, Authenticator};
use std::sync::Arc;

const CHALLENGE: &str = r#"Bearer realm="Enforcer""#;

/// Self-contained bearer tokens in the auth header.
pub struct SignedTokenAuthenticator {
    default_header: String,
    extractor: CredentialExtractor,
    pipeline: Arc<TokenPipeline>,
}

impl SignedTokenAuthenticator {
    pub const NAME: &'static str = "signed_token";
    pub const PRIORITY: i32 = 10;

    pub fn new(config: &EnforcerConfig, pipeline: Arc<TokenPipeline>) -> Self {
        Self {
            default_header: config.auth_header.clone(),
            extractor: CredentialExtractor::new(
                config.websocket_protocol_keyword.clone(),
                config.opaque_key_prefix.clone(),
            ),
            pipeline,
        }
    }

    fn header<'a>(&'a self, req: &'a RequestContext) -> &'a str {
        req.api.auth_header.as_deref().unwrap_or(&self.default_header)
    }
}

impl Authenticator for SignedTokenAuthenticator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, req: &RequestContext) -> bool {
        if req.resource.security_disabled || !req.api.supports(SecurityScheme::OAuth2) {
            return false;
        }
        self.extractor
            .extract(req, self.header(req))
            .is_some_and(|c| c.kind == CredentialKind::SignedToken)
    }

    fn authenticate(&self, req: &mut RequestContext) -> Result<AuthOutcome, AuthError> {
        let credential = self
            .extractor
            .extract(req, self.header(req))
            .filter(|c| c.kind == CredentialKind::SignedToken)
            .ok_or_else(AuthError::missing_credentials)?;
        let ctx = self
            .pipeline
            .run(req, &credential.value, TokenFlow::SignedToken, Self::NAME)?;
        Ok(AuthOutcome::Authenticated(ctx))
    }

    fn challenge(&self) -> &str {
        CHALLENGE
    }
}
