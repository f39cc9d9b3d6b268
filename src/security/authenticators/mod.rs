//! The four [`Authenticator`](super::Authenticator) strategies.
//!
//! | Type | Header | Flow |
//! |---|---|---|
//! | [`SignedTokenAuthenticator`] | `auth_header` (per-API override) | [`TokenFlow::SignedToken`] |
//! | [`ApiKeyAuthenticator`] | `api_key_header` | [`TokenFlow::ApiKey`] |
//! | [`InternalKeyAuthenticator`] | `internal_key_header` | [`TokenFlow::InternalKey`] |
//! | [`UnsecuredAuthenticator`] | none | none |
//!
//! API and internal keys are signed tokens too. On top of the shared
//! [`TokenPipeline`](super::pipeline::TokenPipeline) they keep their own
//! rejected-key cache ([`RejectedKeys`]).
//!
//! [`TokenFlow::SignedToken`]: super::subscription::TokenFlow::SignedToken
//! [`TokenFlow::ApiKey`]: super::subscription::TokenFlow::ApiKey
//! [`TokenFlow::InternalKey`]: super::subscription::TokenFlow::InternalKey

mod api_key;
mod internal_key;
mod signed_token;
mod unsecured;

pub use api_key::ApiKeyAuthenticator;
pub use internal_key::{InternalKeyAuthenticator, INTERNAL_KEY_APPLICATION, INTERNAL_KEY_TOKEN_TYPE};
pub use signed_token::SignedTokenAuthenticator;
pub use unsecured::UnsecuredAuthenticator;

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::AuthError;
use crate::logging::mask_token;
use crate::security::cache::TtlLruCache;
use crate::security::jwt::{ParsedToken, ValidatedToken};
use crate::security::pipeline::TokenPipeline;
use crate::security::CacheStats;
use std::sync::Arc;
use tracing::debug;

/// Keys an authenticator has already rejected, keyed by token id.
///
/// The rejected raw value is stored, so a new key reusing an id is not
/// mistaken for the rejected one.
pub struct RejectedKeys {
    cache: TtlLruCache<String, String>,
}

impl RejectedKeys {
    pub fn new(name: &'static str, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlLruCache::from_config(name, config, clock),
        }
    }

    pub fn is_rejected(&self, token_id: &str, raw: &str) -> bool {
        self.cache.get(token_id).is_some_and(|rejected| rejected == raw)
    }

    pub fn remember(&self, token_id: String, raw: &str) {
        self.cache.insert(token_id, raw.to_string());
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Validate `parsed` through `pipeline`, consulting and feeding this cache.
    ///
    /// Only keys that failed verification are remembered. A key rejected for
    /// an issuer or signing key missing from the current trust material is
    /// retried once that material is refreshed.
    pub(crate) fn validate(
        &self,
        pipeline: &TokenPipeline,
        parsed: &ParsedToken,
    ) -> Result<ValidatedToken, AuthError> {
        let token_id = parsed.token_id();
        if self.is_rejected(&token_id, &parsed.raw) {
            debug!(key = %mask_token(&parsed.raw), "key previously rejected");
            return Err(AuthError::invalid_credentials());
        }
        match pipeline.validate(&parsed.raw) {
            Err(e @ AuthError::InvalidCredentials { .. }) => {
                if pipeline
                    .validator()
                    .failed_verification(&token_id, &parsed.raw)
                {
                    self.remember(token_id, &parsed.raw);
                }
                Err(e)
            }
            other => other,
        }
    }
}
