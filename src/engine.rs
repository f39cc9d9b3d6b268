//! # Enforcer Engine
//!
//! [`Enforcer`] wires an [`EnforcerConfig`] and its external
//! [`Collaborators`] into an [`AuthenticatorChain`] and runs requests through
//! it.
//!
//! Per request the engine:
//!
//! 1. short-circuits prototyped APIs to the anonymous context,
//! 2. dispatches to the chain,
//! 3. on success writes rate-limit metadata into the request,
//! 4. on failure logs the error and writes a `www-authenticate` header.
//!
//! The revoked set and issuer registry handed out by [`Enforcer::revoked`]
//! and [`Enforcer::issuers`] are snapshot handles: an external updater may
//! replace their contents at any time without coordinating with requests.

use crate::clock::{Clock, SystemClock};
use crate::config::EnforcerConfig;
use crate::context::{AuthenticationContext, RequestContext, UNLIMITED_TIER};
use crate::error::AuthError;
use crate::security::authenticators::{
    ApiKeyAuthenticator, InternalKeyAuthenticator, SignedTokenAuthenticator, UnsecuredAuthenticator,
};
use crate::security::backend::{BackendCredentialIssuer, GeneratorRegistry};
use crate::security::cache::TokenCaches;
use crate::security::environment::EnvironmentEnforcer;
use crate::security::exchange::{HttpKeyExchange, KeyExchange, KeyExchangeClient};
use crate::security::issuer::IssuerRegistry;
use crate::security::jwt::{RsaTokenVerifier, SignedTokenValidator, TokenVerifier};
use crate::security::pipeline::TokenPipeline;
use crate::security::revocation::RevokedSet;
use crate::security::subscription::{
    HttpPolicyStore, InMemoryPolicyStore, PolicyStore, SubscriptionAuthorizer,
};
use crate::security::trust::{CompositeTrust, TrustMaterialProvider};
use crate::security::{AuthOutcome, AuthenticatorChain, CacheStats};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata key carrying `<api uuid>:<application uuid>`.
pub const RATELIMIT_SUBSCRIPTION_KEY: &str = "ratelimit:subscription";
/// Metadata key carrying the subscription tier.
pub const RATELIMIT_POLICY_KEY: &str = "ratelimit:policy";
/// Header written when authentication fails.
pub const WWW_AUTHENTICATE_HEADER: &str = "www-authenticate";

const INVALID_TOKEN_SUFFIX: &str =
    r#"error="invalid_token", error_description="The provided token is invalid""#;

/// Everything the engine talks to outside its own process state.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub policy_store: Arc<dyn PolicyStore>,
    pub trust: Arc<dyn TrustMaterialProvider>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Required for opaque API keys.
    pub key_exchange: Option<Arc<dyn KeyExchange>>,
    pub revoked: RevokedSet,
    pub generators: GeneratorRegistry,
}

impl Collaborators {
    /// Production collaborators for `config`.
    ///
    /// Without a policy service URL an empty in-memory store is used, so only
    /// claim-based subscriptions can succeed.
    pub fn from_config(config: &EnforcerConfig) -> Result<Self> {
        let policy_store: Arc<dyn PolicyStore> =
            match HttpPolicyStore::from_config(&config.policy_service)? {
                Some(store) => Arc::new(store),
                None => {
                    debug!("no policy service configured, using an empty in-memory store");
                    Arc::new(InMemoryPolicyStore::new())
                }
            };
        let key_exchange = HttpKeyExchange::from_config(&config.exchange)?
            .map(|e| Arc::new(e) as Arc<dyn KeyExchange>);
        Ok(Self {
            clock: Arc::new(SystemClock),
            policy_store,
            trust: Arc::new(
                CompositeTrust::from_configs(&config.issuers)
                    .context("Failed to load issuer trust material")?,
            ),
            verifier: Arc::new(RsaTokenVerifier::new(config.jwt.allowed_algorithms.clone())),
            key_exchange,
            revoked: RevokedSet::new(),
            generators: GeneratorRegistry::with_defaults(),
        })
    }
}

/// The authentication engine.
pub struct Enforcer {
    config: EnforcerConfig,
    chain: AuthenticatorChain,
    pipeline: Arc<TokenPipeline>,
    caches: Arc<TokenCaches>,
    revoked: RevokedSet,
    issuers: IssuerRegistry,
}

impl Enforcer {
    /// Validate `config` and build the engine with production collaborators.
    pub fn from_config(config: EnforcerConfig) -> Result<Self> {
        config.validate()?;
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: EnforcerConfig, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            clock,
            policy_store,
            trust,
            verifier,
            key_exchange,
            revoked,
            generators,
        } = collaborators;

        let caches = Arc::new(TokenCaches::new(&config.cache, Arc::clone(&clock)));
        let issuers = IssuerRegistry::from_configs(&config.issuers);

        let backend = if config.backend_jwt.enabled {
            let generator = generators.build(&config.backend_jwt, Arc::clone(&clock))?;
            Some(BackendCredentialIssuer::new(
                &config.backend_jwt,
                generator,
                Arc::clone(&caches),
                Arc::clone(&clock),
            ))
        } else {
            None
        };

        let validator = SignedTokenValidator::new(
            &config,
            Arc::clone(&caches),
            revoked.clone(),
            issuers.clone(),
            trust,
            verifier,
            Arc::clone(&clock),
        );
        let pipeline = Arc::new(TokenPipeline::new(
            validator,
            SubscriptionAuthorizer::new(policy_store),
            EnvironmentEnforcer::new(&config.environment),
            backend,
        ));

        let exchange = key_exchange.map(|exchange| {
            KeyExchangeClient::new(
                exchange,
                config.opaque_key_prefix.clone(),
                &config.exchange,
                &config.cache,
                Arc::clone(&clock),
            )
        });

        let chain = AuthenticatorChain::new(vec![
            Box::new(SignedTokenAuthenticator::new(&config, Arc::clone(&pipeline))),
            Box::new(ApiKeyAuthenticator::new(&config, Arc::clone(&pipeline), exchange)),
            Box::new(InternalKeyAuthenticator::new(&config, Arc::clone(&pipeline))),
            Box::new(UnsecuredAuthenticator),
        ]);
        info!(
            authenticators = ?chain.names(),
            issuers = issuers.len(),
            backend_credentials = config.backend_jwt.enabled,
            "enforcer initialised"
        );

        Ok(Self {
            config,
            chain,
            pipeline,
            caches,
            revoked,
            issuers,
        })
    }

    /// Authenticate and authorize one request.
    ///
    /// A soft-failed internal key returns `Ok` with `authenticated == false`.
    pub fn authenticate(&self, req: &mut RequestContext) -> Result<AuthenticationContext, AuthError> {
        if req.api.is_prototyped() {
            debug!(api = %req.api.name, "prototyped API, skipping authentication");
            return Ok(AuthenticationContext::anonymous(req));
        }
        match self.chain.authenticate(req) {
            Ok(AuthOutcome::Authenticated(ctx)) => {
                write_ratelimit_metadata(req, &ctx);
                Ok(ctx)
            }
            Ok(AuthOutcome::Unauthenticated(ctx)) => Ok(ctx),
            Err(e) => {
                e.log();
                req.response_headers
                    .insert(WWW_AUTHENTICATE_HEADER.to_string(), self.challenge_header());
                Err(e)
            }
        }
    }

    fn challenge_header(&self) -> String {
        let challenges = self.chain.challenges();
        if challenges.is_empty() {
            INVALID_TOKEN_SUFFIX.to_string()
        } else {
            format!("{challenges}, {INVALID_TOKEN_SUFFIX}")
        }
    }

    pub fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    pub fn chain(&self) -> &AuthenticatorChain {
        &self.chain
    }

    pub fn pipeline(&self) -> &Arc<TokenPipeline> {
        &self.pipeline
    }

    /// Revocation handle for an external updater.
    pub fn revoked(&self) -> &RevokedSet {
        &self.revoked
    }

    /// Issuer registry handle for an external updater.
    pub fn issuers(&self) -> &IssuerRegistry {
        &self.issuers
    }

    pub fn caches(&self) -> &Arc<TokenCaches> {
        &self.caches
    }

    /// Stats of the shared caches, by cache name.
    pub fn cache_stats(&self) -> Vec<(&'static str, CacheStats)> {
        vec![
            (self.caches.parsed.name(), self.caches.parsed.stats()),
            (self.caches.valid.name(), self.caches.valid.stats()),
            (self.caches.invalid.name(), self.caches.invalid.stats()),
            (self.caches.backend.name(), self.caches.backend.stats()),
        ]
    }
}

fn write_ratelimit_metadata(req: &mut RequestContext, ctx: &AuthenticationContext) {
    if ctx.tier.is_empty() || ctx.tier == UNLIMITED_TIER {
        return;
    }
    req.metadata.insert(
        RATELIMIT_SUBSCRIPTION_KEY.to_string(),
        format!("{}:{}", ctx.api_uuid, ctx.application.uuid),
    );
    req.metadata
        .insert(RATELIMIT_POLICY_KEY.to_string(), ctx.tier.clone());
}
