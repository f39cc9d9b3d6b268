use super::is_rsa_algorithm;
use crate::error::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use tracing::debug;

/// Cryptographic signature check.
///
/// Claims (expiry, not-before, audience) are checked by the caller, not here.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, raw: &str, header: &Header, key: &DecodingKey) -> Result<(), AuthError>;
}

/// Verifies RSA signatures with `jsonwebtoken`.
#[derive(Debug, Clone)]
pub struct RsaTokenVerifier {
    allowed: Vec<Algorithm>,
}

impl Default for RsaTokenVerifier {
    fn default() -> Self {
        Self::new(vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512])
    }
}

impl RsaTokenVerifier {
    /// Non-RSA entries in `allowed` are ignored.
    pub fn new(allowed: Vec<Algorithm>) -> Self {
        Self {
            allowed: allowed.into_iter().filter(|a| is_rsa_algorithm(*a)).collect(),
        }
    }
}

impl TokenVerifier for RsaTokenVerifier {
    fn verify(&self, raw: &str, header: &Header, key: &DecodingKey) -> Result<(), AuthError> {
        if !is_rsa_algorithm(header.alg) || !self.allowed.contains(&header.alg) {
            debug!(alg = ?header.alg, "token algorithm rejected");
            return Err(AuthError::invalid_credentials());
        }
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<serde_json::Value>(raw, key, &validation)
            .map(|_| ())
            .map_err(|e| {
                debug!(error = %e, "token signature verification failed");
                AuthError::invalid_credentials()
            })
    }
}
