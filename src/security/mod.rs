//! # Security Module
//!
//! The authentication engine of the enforcer: everything between "a request
//! arrived with some headers" and "this caller may invoke this operation with
//! this identity and tier".
//!
//! ## Overview
//!
//! Every request is dispatched to exactly one [`Authenticator`]. Four are
//! provided, in descending priority:
//!
//! | Authenticator | Priority | Handles |
//! |---|---|---|
//! | [`ApiKeyAuthenticator`] | 30 | `apikey` header (signed API keys and opaque `chp_` keys) |
//! | [`SignedTokenAuthenticator`] | 10 | `Authorization: Bearer <jwt>` |
//! | [`UnsecuredAuthenticator`] | 0 | resources with security disabled |
//! | [`InternalKeyAuthenticator`] | -10 | `internal-key` header |
//!
//! The [`AuthenticatorChain`] is sorted once at construction and never
//! re-sorted. The first authenticator whose [`Authenticator::can_handle`]
//! returns `true` runs; if it fails, the failure is final and no other
//! authenticator is tried.
//!
//! ## Pipeline
//!
//! Signed-token based authenticators share one [`pipeline::TokenPipeline`]:
//!
//! ```text
//! revocation -> caches -> signature/claims -> subscription -> lifecycle
//!            -> environment -> scope -> backend credential
//! ```
//!
//! ## Caching
//!
//! [`cache::TokenCaches`] holds four process-wide caches (parsed tokens,
//! valid results, rejected tokens, backend credentials). A cached positive
//! result is always re-checked against revocation and expiry before use.
//! Every cache reports [`CacheStats`].
//!
//! ## Soft failure
//!
//! [`AuthOutcome::Unauthenticated`] is returned, not raised, when the internal
//! key authenticator sees a token that is not an internal key. The chain
//! stops there and the caller decides what an unauthenticated request means.

pub mod authenticators;
pub mod backend;
pub mod cache;
pub mod environment;
pub mod exchange;
pub mod extractor;
pub mod issuer;
pub mod jwt;
pub mod pipeline;
pub mod restrictions;
pub mod revocation;
pub mod scope;
pub mod subscription;
pub mod trust;

pub use authenticators::{
    ApiKeyAuthenticator, InternalKeyAuthenticator, SignedTokenAuthenticator,
    UnsecuredAuthenticator,
};

use crate::context::{AuthenticationContext, RequestContext};
use crate::error::AuthError;
use tracing::{debug, info_span};

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses (including expired entries)
    pub misses: u64,
    /// Number of entries evicted due to LRU capacity
    pub evictions: u64,
    /// Current number of entries in cache
    pub size: usize,
    /// Maximum capacity of cache (0 when disabled)
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Result of running an authenticator.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated(AuthenticationContext),
    /// Soft failure: the selected authenticator declined the credential
    /// without rejecting the request. The chain does not continue.
    Unauthenticated(AuthenticationContext),
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }

    pub fn context(&self) -> &AuthenticationContext {
        match self {
            AuthOutcome::Authenticated(ctx) | AuthOutcome::Unauthenticated(ctx) => ctx,
        }
    }

    pub fn into_context(self) -> AuthenticationContext {
        match self {
            AuthOutcome::Authenticated(ctx) | AuthOutcome::Unauthenticated(ctx) => ctx,
        }
    }
}

/// One authentication strategy.
///
/// Implementations must be cheap to query with [`can_handle`](Self::can_handle):
/// it runs for every request until one authenticator claims it.
pub trait Authenticator: Send + Sync {
    /// Short name used in logs and in [`AuthenticationContext::authenticator`].
    fn name(&self) -> &'static str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    fn can_handle(&self, req: &RequestContext) -> bool;

    fn authenticate(&self, req: &mut RequestContext) -> Result<AuthOutcome, AuthError>;

    /// `WWW-Authenticate` challenge for this scheme. Empty when the scheme has none.
    fn challenge(&self) -> &str {
        ""
    }
}

/// Priority-ordered authenticators.
pub struct AuthenticatorChain {
    authenticators: Vec<Box<dyn Authenticator>>,
}

impl AuthenticatorChain {
    /// Build a chain. Sorted by descending priority; equal priorities keep insertion order.
    pub fn new(mut authenticators: Vec<Box<dyn Authenticator>>) -> Self {
        authenticators.sort_by_key(|a| std::cmp::Reverse(a.priority()));
        Self { authenticators }
    }

    /// Names in dispatch order.
    pub fn names(&self) -> Vec<&'static str> {
        self.authenticators.iter().map(|a| a.name()).collect()
    }

    /// Run the first authenticator that can handle the request.
    pub fn authenticate(&self, req: &mut RequestContext) -> Result<AuthOutcome, AuthError> {
        let selected = self.authenticators.iter().find(|a| a.can_handle(req));
        let Some(authenticator) = selected else {
            debug!(
                api = %req.api.name,
                resource = %req.resource.path,
                "no authenticator can handle request"
            );
            return Err(AuthError::missing_credentials());
        };
        let span = info_span!(
            "authenticate",
            authenticator = authenticator.name(),
            api = %req.api.name,
            version = %req.api.version,
        );
        let _entered = span.enter();
        authenticator.authenticate(req)
    }

    /// Non-empty challenges joined by a space.
    pub fn challenges(&self) -> String {
        self.authenticators
            .iter()
            .map(|a| a.challenge())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
