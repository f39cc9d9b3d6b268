//! Backend credential issuance.
//!
//! After a request is authorized, the enforcer can mint a short-lived signed
//! token describing the caller and forward it to the upstream service in a
//! configured header. Generators are pluggable: a [`GeneratorRegistry`] maps
//! the configured name to a constructor, resolved once at startup.
//!
//! Issued credentials are cached per `(API context, API version, token id)`
//! and reused while they have more than `skew_secs` left.

use crate::clock::Clock;
use crate::config::BackendJwtConfig;
use crate::context::{ApplicationIdentity, KeyType};
use crate::error::AuthError;
use crate::security::cache::TokenCaches;
use crate::security::jwt::ParsedToken;
use anyhow::{anyhow, Context};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Name of the built-in generator.
pub const DEFAULT_GENERATOR: &str = "default";

#[derive(Debug, Error)]
pub enum BackendTokenError {
    #[error("failed to sign backend token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("generator rejected input: {0}")]
    InvalidInput(String),
}

/// What a generator knows about the authorized call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendTokenInput {
    pub subject: String,
    pub organizations: Vec<String>,
    pub application: ApplicationIdentity,
    pub subscription_tier: String,
    pub api_name: String,
    pub api_context: String,
    pub api_version: String,
    pub key_type: KeyType,
    /// Identifier of the inbound token; part of the cache key.
    pub token_id: String,
    /// Extra trusted claims added verbatim.
    pub custom_claims: Map<String, Value>,
}

/// Produces a signed credential for the upstream service.
pub trait BackendTokenGenerator: Send + Sync {
    fn generate(&self, input: &BackendTokenInput) -> Result<String, BackendTokenError>;
}

/// Constructor registered under a configuration name.
pub type GeneratorFactory =
    fn(&BackendJwtConfig, Arc<dyn Clock>) -> anyhow::Result<Arc<dyn BackendTokenGenerator>>;

/// Maps generator names to constructors.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    factories: HashMap<String, GeneratorFactory>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing the built-in RS256 generator as `"default"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_GENERATOR, default_generator_factory);
        registry
    }

    pub fn register(&mut self, name: &str, factory: GeneratorFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up a constructor. Unknown names are a configuration error.
    pub fn resolve(&self, name: &str) -> anyhow::Result<GeneratorFactory> {
        self.factories.get(name).copied().ok_or_else(|| {
            anyhow!(
                "unknown backend_jwt.generator '{}' (registered: {})",
                name,
                self.names().join(", ")
            )
        })
    }

    /// Resolve the configured generator and construct it.
    pub fn build(
        &self,
        config: &BackendJwtConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Arc<dyn BackendTokenGenerator>> {
        let factory = self.resolve(&config.generator)?;
        factory(config, clock)
            .with_context(|| format!("Failed to build backend generator '{}'", config.generator))
    }
}

fn default_generator_factory(
    config: &BackendJwtConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn BackendTokenGenerator>> {
    Ok(Arc::new(DefaultBackendTokenGenerator::from_config(config, clock)?))
}

/// RS256 generator.
pub struct DefaultBackendTokenGenerator {
    issuer: String,
    ttl_secs: i64,
    key: EncodingKey,
    clock: Arc<dyn Clock>,
}

impl DefaultBackendTokenGenerator {
    pub fn from_config(config: &BackendJwtConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let pem = config.signing_key_pem()?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .context("backend_jwt signing key is not an RSA private key")?;
        Ok(Self {
            issuer: config.issuer.clone(),
            ttl_secs: config.ttl_secs,
            key,
            clock,
        })
    }
}

impl BackendTokenGenerator for DefaultBackendTokenGenerator {
    fn generate(&self, input: &BackendTokenInput) -> Result<String, BackendTokenError> {
        if input.subject.is_empty() && input.application.uuid.is_empty() {
            return Err(BackendTokenError::InvalidInput(
                "no subject or application".to_string(),
            ));
        }
        let now = self.clock.now_secs();
        let mut claims = json!({
            "iss": self.issuer,
            "sub": input.subject,
            "iat": now,
            "exp": now.saturating_add(self.ttl_secs),
            "jti": ulid::Ulid::new().to_string(),
            "application": input.application,
            "subscriptionTier": input.subscription_tier,
            "apiName": input.api_name,
            "apiContext": input.api_context,
            "version": input.api_version,
            "keytype": input.key_type.as_str(),
            "organizations": input.organizations,
        });
        if let Value::Object(map) = &mut claims {
            for (k, v) in &input.custom_claims {
                map.insert(k.clone(), v.clone());
            }
        }
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        Ok(jsonwebtoken::encode(&header, &claims, &self.key)?)
    }
}

/// Issues and caches backend credentials.
pub struct BackendCredentialIssuer {
    generator: Arc<dyn BackendTokenGenerator>,
    caches: Arc<TokenCaches>,
    clock: Arc<dyn Clock>,
    skew_secs: i64,
    header: String,
}

impl BackendCredentialIssuer {
    pub fn new(
        config: &BackendJwtConfig,
        generator: Arc<dyn BackendTokenGenerator>,
        caches: Arc<TokenCaches>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            generator,
            caches,
            clock,
            skew_secs: config.skew_secs,
            header: config.header.clone(),
        }
    }

    /// Response header the credential is written to.
    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn issue(&self, input: &BackendTokenInput) -> Result<String, AuthError> {
        let cache_key = format!("{}:{}:{}", input.api_context, input.api_version, input.token_id);
        if let Some(cached) = self.caches.backend.get(&cache_key) {
            if self.still_fresh(&cached) {
                return Ok(cached);
            }
            debug!(api = %input.api_name, "cached backend credential near expiry, regenerating");
        }
        let credential = self
            .generator
            .generate(input)
            .map_err(|e| AuthError::internal(format!("backend credential generation failed: {e}")))?;
        self.caches.backend.insert(cache_key, credential.clone());
        Ok(credential)
    }

    fn still_fresh(&self, credential: &str) -> bool {
        ParsedToken::parse(credential)
            .ok()
            .and_then(|p| p.expires_at())
            .is_some_and(|exp| exp.saturating_sub(self.clock.now_secs()) > self.skew_secs)
    }
}
