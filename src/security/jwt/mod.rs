//! Signed token model and validation.
//!
//! - [`ParsedToken`]: decoded header and claims, paired with the raw token.
//! - [`ValidationResult`]: outcome of signature and claims verification.
//! - [`TokenVerifier`]: the cryptographic check, behind a trait so the
//!   validation pipeline can be exercised with a counting fake.
//! - [`SignedTokenValidator`]: revocation, caches, verification, audience.

mod validator;
mod verifier;

pub use validator::{SignedTokenValidator, ValidatedToken};
pub use verifier::{RsaTokenVerifier, TokenVerifier};

use crate::error::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, Header};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Whether `alg` is an RSA signature algorithm (PKCS#1 v1.5 or PSS).
pub fn is_rsa_algorithm(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

/// The signature segment of a three-segment token, if the token has that shape.
pub fn signature_segment(raw: &str) -> Option<&str> {
    let mut parts = raw.split('.');
    let (Some(h), Some(p), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    if h.is_empty() || p.is_empty() || s.is_empty() {
        return None;
    }
    Some(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationStatus {
    #[default]
    NotValidated,
    Valid,
    Invalid,
}

/// Decoded, unverified token.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub raw: String,
    pub header: Header,
    pub claims: Map<String, Value>,
    pub signature: String,
    pub status: ValidationStatus,
}

impl ParsedToken {
    /// Decode header and payload. Does not verify anything.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let signature = signature_segment(raw).ok_or_else(AuthError::invalid_credentials)?;
        let header = jsonwebtoken::decode_header(raw).map_err(|e| {
            tracing::debug!(error = %e, "token header could not be decoded");
            AuthError::invalid_credentials()
        })?;
        let payload = raw.split('.').nth(1).unwrap_or_default();
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| {
                tracing::debug!(error = %e, "token payload is not base64url");
                AuthError::invalid_credentials()
            })?;
        let claims: Map<String, Value> = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::debug!(error = %e, "token payload is not a JSON object");
            AuthError::invalid_credentials()
        })?;
        Ok(Self {
            raw: raw.to_string(),
            header,
            claims,
            signature: signature.to_string(),
            status: ValidationStatus::NotValidated,
        })
    }

    /// `jti`, or the signature segment when the token has none.
    pub fn token_id(&self) -> String {
        self.claim_str("jti")
            .filter(|j| !j.is_empty())
            .unwrap_or(&self.signature)
            .to_string()
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claim_str("iss")
    }

    pub fn token_type(&self) -> Option<&str> {
        self.claim_str("token_type")
    }

    pub fn expires_at(&self) -> Option<i64> {
        numeric_claim(&self.claims, "exp")
    }

    pub fn not_before(&self) -> Option<i64> {
        numeric_claim(&self.claims, "nbf")
    }

    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.status = status;
        self
    }
}

pub(crate) fn numeric_claim(claims: &Map<String, Value>, name: &str) -> Option<i64> {
    let v = claims.get(name)?;
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

/// `aud` as a list, whether the claim is a string or an array.
pub fn audiences(claims: &Map<String, Value>) -> Vec<String> {
    match claims.get("aud") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// `scope` as a set, whether space-delimited or an array.
pub fn scopes(claims: &Map<String, Value>) -> BTreeSet<String> {
    match claims.get("scope") {
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Outcome of signature and claims verification.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub failure_code: Option<u32>,
    pub token_id: String,
    pub issuer: String,
    pub consumer_key: Option<String>,
    pub subject: String,
    pub scopes: BTreeSet<String>,
    pub expires_at: Option<i64>,
    pub claims: Map<String, Value>,
    /// The raw token this result was computed for.
    pub raw: String,
}

impl ValidationResult {
    /// Successful result for `parsed`, reading the consumer key from `consumer_key_claim` (else `azp`).
    pub fn valid(parsed: &ParsedToken, consumer_key_claim: &str) -> Self {
        let consumer_key = parsed
            .claim_str(consumer_key_claim)
            .or_else(|| parsed.claim_str("azp"))
            .map(str::to_string);
        Self {
            valid: true,
            failure_code: None,
            token_id: parsed.token_id(),
            issuer: parsed.issuer().unwrap_or_default().to_string(),
            consumer_key,
            subject: parsed.claim_str("sub").unwrap_or_default().to_string(),
            scopes: scopes(&parsed.claims),
            expires_at: parsed.expires_at(),
            claims: parsed.claims.clone(),
            raw: parsed.raw.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(header: &Value, claims: &Value) -> String {
        format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    #[test]
    fn test_parse_reads_claims() {
        let raw = encode(
            &json!({"alg":"RS256","typ":"JWT","kid":"k1"}),
            &json!({"iss":"https://idp","jti":"abc","exp":1700000000,"scope":"read write","aud":"x"}),
        );
        let parsed = ParsedToken::parse(&raw).unwrap();
        assert_eq!(parsed.header.alg, Algorithm::RS256);
        assert_eq!(parsed.header.kid.as_deref(), Some("k1"));
        assert_eq!(parsed.issuer(), Some("https://idp"));
        assert_eq!(parsed.token_id(), "abc");
        assert_eq!(parsed.expires_at(), Some(1_700_000_000));
        assert_eq!(parsed.signature, "c2ln");
        assert_eq!(parsed.status, ValidationStatus::NotValidated);
        assert_eq!(scopes(&parsed.claims).len(), 2);
        assert_eq!(audiences(&parsed.claims), vec!["x".to_string()]);
    }

    #[test]
    fn test_token_id_falls_back_to_signature() {
        let raw = encode(&json!({"alg":"RS256"}), &json!({"iss":"https://idp"}));
        assert_eq!(ParsedToken::parse(&raw).unwrap().token_id(), "c2ln");
    }

    #[test]
    fn test_parse_failures_are_invalid_credentials() {
        for raw in ["a.b", "a.b.c", "!!!.???.sig", "", "a..c"] {
            let err = ParsedToken::parse(raw).unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials { .. }), "{raw}");
        }
        // Payload that is JSON but not an object
        let raw = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode("[1,2]")
        );
        assert!(ParsedToken::parse(&raw).is_err());
    }

    #[test]
    fn test_signature_segment() {
        assert_eq!(signature_segment("a.b.c"), Some("c"));
        assert_eq!(signature_segment("a.b"), None);
        assert_eq!(signature_segment("a.b.c.d"), None);
        assert_eq!(signature_segment("a.b."), None);
    }

    #[test]
    fn test_rsa_family() {
        assert!(is_rsa_algorithm(Algorithm::RS256));
        assert!(is_rsa_algorithm(Algorithm::PS512));
        assert!(!is_rsa_algorithm(Algorithm::HS256));
        assert!(!is_rsa_algorithm(Algorithm::ES256));
    }

    #[test]
    fn test_scope_and_audience_arrays() {
        let claims = json!({"scope":["a","b"],"aud":["x","y"]});
        let claims = claims.as_object().unwrap();
        assert!(scopes(claims).contains("b"));
        assert_eq!(audiences(claims).len(), 2);
    }

    #[test]
    fn test_validation_result_consumer_key_fallback() {
        let raw = encode(&json!({"alg":"RS256"}), &json!({"azp":"client-1","sub":"alice"}));
        let parsed = ParsedToken::parse(&raw).unwrap();
        let result = ValidationResult::valid(&parsed, "consumerKey");
        assert_eq!(result.consumer_key.as_deref(), Some("client-1"));
        assert_eq!(result.subject, "alice");
        assert_eq!(result.raw, raw);
    }
}
