use super::{audiences, signature_segment, ParsedToken, TokenVerifier, ValidationResult, ValidationStatus};
use crate::clock::Clock;
use crate::config::EnforcerConfig;
use crate::error::AuthError;
use crate::logging::mask_token;
use crate::security::cache::TokenCaches;
use crate::security::issuer::{IssuerPolicy, IssuerRegistry};
use crate::security::revocation::RevokedSet;
use crate::security::trust::TrustMaterialProvider;
use std::sync::Arc;
use tracing::{debug, warn};

/// A token that passed signature, claims and audience checks.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub parsed: ParsedToken,
    pub result: ValidationResult,
    pub issuer: IssuerPolicy,
}

/// Signature and claims validation with positive and negative caching.
///
/// Order for one token:
/// 1. parse (parsed-token cache by signature, guarded by the raw string)
/// 2. revocation
/// 3. positive cache (expiry re-checked) / negative cache
/// 4. issuer, key, signature, `exp` / `nbf`
/// 5. environment-scoped audience
pub struct SignedTokenValidator {
    caches: Arc<TokenCaches>,
    revoked: RevokedSet,
    issuers: IssuerRegistry,
    trust: Arc<dyn TrustMaterialProvider>,
    verifier: Arc<dyn TokenVerifier>,
    clock: Arc<dyn Clock>,
    clock_skew_secs: i64,
    gateway_environment: String,
    environment_prefix: String,
}

impl SignedTokenValidator {
    pub fn new(
        config: &EnforcerConfig,
        caches: Arc<TokenCaches>,
        revoked: RevokedSet,
        issuers: IssuerRegistry,
        trust: Arc<dyn TrustMaterialProvider>,
        verifier: Arc<dyn TokenVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            caches,
            revoked,
            issuers,
            trust,
            verifier,
            clock,
            clock_skew_secs: config.jwt.clock_skew_secs,
            gateway_environment: config.gateway_environment.clone(),
            environment_prefix: config.environment_prefix.clone(),
        }
    }

    pub fn caches(&self) -> &Arc<TokenCaches> {
        &self.caches
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn clock_skew_secs(&self) -> i64 {
        self.clock_skew_secs
    }

    /// Whether `raw` failed signature or time-claim verification.
    ///
    /// Trust misses (unknown issuer, unknown key) and revocation are not
    /// recorded here, so this stays false for them.
    pub fn failed_verification(&self, token_id: &str, raw: &str) -> bool {
        self.caches
            .invalid
            .get(token_id)
            .is_some_and(|rejected| rejected == raw)
    }

    /// Validate a signed token.
    pub fn validate(&self, raw: &str) -> Result<ValidatedToken, AuthError> {
        let signature = signature_segment(raw).ok_or_else(AuthError::invalid_credentials)?;
        let parsed = self.parse_cached(raw, signature)?;
        let token_id = parsed.token_id();

        if self.revoked.is_revoked(&token_id) {
            self.caches.valid.remove(&token_id);
            debug!(token = %mask_token(raw), "token is revoked");
            return Err(AuthError::invalid_credentials());
        }
        if parsed.status == ValidationStatus::Invalid {
            return Err(AuthError::invalid_credentials());
        }

        let issuer = parsed
            .issuer()
            .and_then(|iss| self.issuers.get(iss))
            .ok_or_else(|| {
                debug!(iss = ?parsed.issuer(), "token issuer is not trusted");
                AuthError::invalid_credentials()
            })?;

        let result = match self.caches.valid.get(&token_id).filter(|r| r.raw == raw) {
            Some(cached) => {
                if self.is_expired(cached.expires_at) {
                    self.caches.valid.remove(&token_id);
                    self.caches.invalid.insert(token_id, raw.to_string());
                    debug!(token = %mask_token(raw), "cached token has expired");
                    return Err(AuthError::invalid_credentials());
                }
                cached
            }
            None => {
                if self
                    .caches
                    .invalid
                    .get(&token_id)
                    .is_some_and(|rejected| rejected == raw)
                {
                    return Err(AuthError::invalid_credentials());
                }
                self.verify_and_cache(parsed.clone(), &issuer, signature)?
            }
        };

        self.check_audience(&result)?;
        Ok(ValidatedToken {
            parsed,
            result,
            issuer,
        })
    }

    fn parse_cached(&self, raw: &str, signature: &str) -> Result<ParsedToken, AuthError> {
        if let Some(cached) = self.caches.parsed.get(signature) {
            if cached.raw == raw {
                return Ok(cached);
            }
        }
        let parsed = ParsedToken::parse(raw)?;
        self.caches.parsed.insert(signature.to_string(), parsed.clone());
        Ok(parsed)
    }

    fn verify_and_cache(
        &self,
        parsed: ParsedToken,
        issuer: &IssuerPolicy,
        signature: &str,
    ) -> Result<ValidationResult, AuthError> {
        let key = self
            .trust
            .resolve_public_key(issuer, parsed.header.kid.as_deref())
            .ok_or_else(|| {
                warn!(issuer = %issuer.name, kid = ?parsed.header.kid, "no trust material for token");
                AuthError::invalid_credentials()
            })?;

        let token_id = parsed.token_id();
        let outcome = self
            .verifier
            .verify(&parsed.raw, &parsed.header, &key)
            .and_then(|()| self.check_time_claims(&parsed));

        match outcome {
            Ok(()) => {
                let result = ValidationResult::valid(&parsed, &issuer.consumer_key_claim);
                self.caches.valid.insert(token_id, result.clone());
                self.caches
                    .parsed
                    .insert(signature.to_string(), parsed.with_status(ValidationStatus::Valid));
                Ok(result)
            }
            Err(e) => {
                self.caches.invalid.insert(token_id, parsed.raw.clone());
                self.caches
                    .parsed
                    .insert(signature.to_string(), parsed.with_status(ValidationStatus::Invalid));
                Err(e)
            }
        }
    }

    /// Tokens without `exp` never expire.
    fn is_expired(&self, expires_at: Option<i64>) -> bool {
        match expires_at {
            Some(exp) => exp.saturating_add(self.clock_skew_secs) < self.clock.now_secs(),
            None => false,
        }
    }

    fn check_time_claims(&self, parsed: &ParsedToken) -> Result<(), AuthError> {
        if self.is_expired(parsed.expires_at()) {
            debug!(token = %mask_token(&parsed.raw), "token has expired");
            return Err(AuthError::invalid_credentials());
        }
        if let Some(nbf) = parsed.not_before() {
            if nbf.saturating_sub(self.clock_skew_secs) > self.clock.now_secs() {
                debug!(token = %mask_token(&parsed.raw), "token is not yet valid");
                return Err(AuthError::invalid_credentials());
            }
        }
        Ok(())
    }

    /// Tokens whose audience is scoped to environments must name this gateway's environment.
    fn check_audience(&self, result: &ValidationResult) -> Result<(), AuthError> {
        let aud = audiences(&result.claims);
        if !aud.iter().any(|a| a.starts_with(&self.environment_prefix)) {
            return Ok(());
        }
        let expected = format!("{}{}", self.environment_prefix, self.gateway_environment);
        if aud.iter().any(|a| *a == expected) {
            Ok(())
        } else {
            debug!(expected = %expected, "token audience does not include this environment");
            Err(AuthError::invalid_environment())
        }
    }
}
