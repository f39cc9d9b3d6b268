//! The authorization stages shared by every signed-token based authenticator.
//!
//! Validation ([`SignedTokenValidator`]) covers revocation, caches, signature
//! and claims. [`TokenPipeline::authorize`] then runs, strictly in order:
//! subscription (including lifecycle), environment, scope, and backend
//! credential issuance, and assembles the [`AuthenticationContext`].

use crate::context::{AuthenticationContext, RequestContext};
use crate::error::AuthError;
use crate::security::backend::{BackendCredentialIssuer, BackendTokenInput};
use crate::security::environment::EnvironmentEnforcer;
use crate::security::jwt::{SignedTokenValidator, ValidatedToken};
use crate::security::scope::{is_dev_portal_test_key, ScopeAuthorizer};
use crate::security::subscription::{SubscriptionAuthorizer, SubscriptionDecision, TokenFlow};
use serde_json::Value;
use tracing::{debug, debug_span};

pub struct TokenPipeline {
    validator: SignedTokenValidator,
    subscriptions: SubscriptionAuthorizer,
    environment: EnvironmentEnforcer,
    scopes: ScopeAuthorizer,
    backend: Option<BackendCredentialIssuer>,
}

impl TokenPipeline {
    pub fn new(
        validator: SignedTokenValidator,
        subscriptions: SubscriptionAuthorizer,
        environment: EnvironmentEnforcer,
        backend: Option<BackendCredentialIssuer>,
    ) -> Self {
        Self {
            validator,
            subscriptions,
            environment,
            scopes: ScopeAuthorizer,
            backend,
        }
    }

    pub fn validator(&self) -> &SignedTokenValidator {
        &self.validator
    }

    pub fn subscriptions(&self) -> &SubscriptionAuthorizer {
        &self.subscriptions
    }

    pub fn validate(&self, raw: &str) -> Result<ValidatedToken, AuthError> {
        let span = debug_span!("validate_token");
        let _entered = span.enter();
        self.validator.validate(raw)
    }

    /// Authorize an already validated token for the request's API and resource.
    pub fn authorize(
        &self,
        req: &mut RequestContext,
        token: &ValidatedToken,
        flow: TokenFlow,
        authenticator: &'static str,
    ) -> Result<AuthenticationContext, AuthError> {
        let decision = {
            let span = debug_span!("subscription");
            let _entered = span.enter();
            self.subscriptions.authorize(&req.api, token, flow)?
        };

        self.environment.check_issuer(&token.issuer, &req.api)?;
        self.environment.check_key_type(decision.key_type, &req.api)?;

        let scopes_validated = self.check_scopes(req, token, flow)?;

        let mut ctx = build_context(req, token, &decision, authenticator);
        ctx.scopes_validated = scopes_validated;

        if let Some(backend) = &self.backend {
            let span = debug_span!("backend_credential");
            let _entered = span.enter();
            let credential = backend.issue(&backend_input(req, token, &decision))?;
            req.response_headers
                .insert(backend.header().to_string(), credential.clone());
            ctx.backend_credential = Some(credential);
        }
        Ok(ctx)
    }

    /// Validate then authorize.
    pub fn run(
        &self,
        req: &mut RequestContext,
        raw: &str,
        flow: TokenFlow,
        authenticator: &'static str,
    ) -> Result<AuthenticationContext, AuthError> {
        let token = self.validate(raw)?;
        self.authorize(req, &token, flow, authenticator)
    }

    /// Returns whether a scope check was performed.
    fn check_scopes(
        &self,
        req: &RequestContext,
        token: &ValidatedToken,
        flow: TokenFlow,
    ) -> Result<bool, AuthError> {
        match flow {
            TokenFlow::SignedToken => {
                self.scopes.authorize(&req.resource, &token.result.scopes)?;
                Ok(true)
            }
            // API keys carry no scopes
            TokenFlow::ApiKey => Ok(false),
            TokenFlow::InternalKey => {
                if is_dev_portal_test_key(&token.result.issuer) && !req.resource.scopes.is_empty() {
                    debug!(resource = %req.resource.path, "dev portal test key used on a scoped resource");
                    return Err(AuthError::invalid_scope(&req.resource.path));
                }
                Ok(true)
            }
        }
    }
}

fn build_context(
    req: &RequestContext,
    token: &ValidatedToken,
    decision: &SubscriptionDecision,
    authenticator: &'static str,
) -> AuthenticationContext {
    AuthenticationContext {
        authenticated: true,
        authenticator: authenticator.to_string(),
        username: token.result.subject.clone(),
        token_id: token.result.token_id.clone(),
        tier: decision.tier.clone(),
        key_type: decision.key_type,
        application: decision.application.clone(),
        subscriber: decision.subscriber.clone(),
        subscriber_tenant_domain: decision.subscriber_tenant_domain.clone(),
        api_name: req.api.name.clone(),
        api_uuid: req.api.uuid.clone(),
        api_version: req.api.version.clone(),
        api_publisher: decision.publisher.clone(),
        api_tier: req.api.tier.clone(),
        consumer_key: decision
            .consumer_key
            .clone()
            .or_else(|| token.result.consumer_key.clone()),
        content_aware: decision.content_aware,
        stop_on_quota_reach: decision.stop_on_quota_reach,
        spike_arrest_limit: decision.spike_arrest_limit,
        spike_arrest_unit: decision.spike_arrest_unit.clone(),
        backend_credential: None,
        scopes_validated: false,
    }
}

fn backend_input(
    req: &RequestContext,
    token: &ValidatedToken,
    decision: &SubscriptionDecision,
) -> BackendTokenInput {
    let organizations = match token.parsed.claim("organizations") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ if !req.api.organization_id.is_empty() => vec![req.api.organization_id.clone()],
        _ => Vec::new(),
    };
    BackendTokenInput {
        subject: token.result.subject.clone(),
        organizations,
        application: decision.application.clone(),
        subscription_tier: decision.tier.clone(),
        api_name: req.api.name.clone(),
        api_context: req.api.base_path.clone(),
        api_version: req.api.version.clone(),
        key_type: decision.key_type,
        token_id: token.result.token_id.clone(),
        custom_claims: Default::default(),
    }
}
