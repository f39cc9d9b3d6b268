//! # Enforcer Configuration
//!
//! Configuration is loaded from a YAML file and then overridden by
//! environment variables, so a container image can ship one file and tune it
//! per deployment.
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `ENFORCER_GATEWAY_ENVIRONMENT` | `gateway_environment` |
//! | `ENFORCER_AUTH_HEADER` | `auth_header` |
//! | `ENFORCER_API_KEY_HEADER` | `api_key_header` |
//! | `ENFORCER_INTERNAL_KEY_HEADER` | `internal_key_header` |
//! | `ENFORCER_CLOCK_SKEW_SECS` | `jwt.clock_skew_secs` |
//! | `ENFORCER_CACHE_ENABLED` | `cache.enabled` |
//! | `ENFORCER_CACHE_CAPACITY` | `cache.capacity` |
//! | `ENFORCER_CACHE_TTL_SECS` | `cache.ttl_secs` |
//! | `ENFORCER_ENVIRONMENT_RELAXED` | `environment.relaxed` |
//! | `ENFORCER_EXCHANGE_URL` | `exchange.url` |
//! | `ENFORCER_POLICY_SERVICE_URL` | `policy_service.url` |
//!
//! ## Example
//!
//! ```yaml
//! gateway_environment: Production
//! jwt:
//!   clock_skew_secs: 5
//! issuers:
//!   - name: Resident Key Manager
//!     issuer: https://idp.example.com/oauth2/token
//!     certificate_pem: |
//!       -----BEGIN PUBLIC KEY-----
//!       ...
//!       -----END PUBLIC KEY-----
//!     validate_subscriptions: true
//! backend_jwt:
//!   enabled: true
//!   generator: default
//!   private_key_pem_file: /etc/enforcer/backend.pem
//! ```

use anyhow::{bail, Context, Result};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerConfig {
    /// Name of the environment this gateway serves.
    pub gateway_environment: String,
    /// Prefix marking environment-scoped `aud` entries.
    pub environment_prefix: String,
    pub auth_header: String,
    pub api_key_header: String,
    pub internal_key_header: String,
    /// First value of `sec-websocket-protocol` that marks the second value as a credential.
    pub websocket_protocol_keyword: String,
    /// Prefix identifying opaque (exchangeable) API keys.
    pub opaque_key_prefix: String,
    pub jwt: JwtConfig,
    pub cache: CacheConfig,
    pub backend_jwt: BackendJwtConfig,
    pub environment: EnvironmentConfig,
    pub issuers: Vec<IssuerConfig>,
    pub exchange: ExchangeConfig,
    pub policy_service: PolicyServiceConfig,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            gateway_environment: "Default".to_string(),
            environment_prefix: "choreo:deployment:".to_string(),
            auth_header: "authorization".to_string(),
            api_key_header: "apikey".to_string(),
            internal_key_header: "internal-key".to_string(),
            websocket_protocol_keyword: "choreo-oauth2-token".to_string(),
            opaque_key_prefix: "chp_".to_string(),
            jwt: JwtConfig::default(),
            cache: CacheConfig::default(),
            backend_jwt: BackendJwtConfig::default(),
            environment: EnvironmentConfig::default(),
            issuers: Vec::new(),
            exchange: ExchangeConfig::default(),
            policy_service: PolicyServiceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Clock skew tolerated on `exp` / `nbf`.
    pub clock_skew_secs: i64,
    pub allowed_algorithms: Vec<Algorithm>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: 5,
            allowed_algorithms: vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendJwtConfig {
    pub enabled: bool,
    /// Registry name of the generator to use.
    pub generator: String,
    /// Header the generated credential is written to.
    pub header: String,
    pub issuer: String,
    pub ttl_secs: i64,
    /// A cached credential is reused only while it has more than this many seconds left.
    pub skew_secs: i64,
    pub private_key_pem: Option<String>,
    pub private_key_pem_file: Option<String>,
}

impl Default for BackendJwtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            generator: "default".to_string(),
            header: "x-jwt-assertion".to_string(),
            issuer: "wso2.org/products/am".to_string(),
            ttl_secs: 3600,
            skew_secs: 30,
            private_key_pem: None,
            private_key_pem_file: None,
        }
    }
}

impl BackendJwtConfig {
    /// Resolve the signing key PEM, inline first, then from file.
    pub fn signing_key_pem(&self) -> Result<String> {
        if let Some(pem) = &self.private_key_pem {
            return Ok(pem.clone());
        }
        if let Some(path) = &self.private_key_pem_file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read backend signing key from {path}"));
        }
        bail!("backend_jwt requires private_key_pem or private_key_pem_file")
    }
}

/// Deployment-type enforcement settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Permit production tokens on non-production deployments (deprecated pattern).
    pub relaxed: bool,
    /// Organizations allowed to use the relaxed pattern. `None` means all.
    pub allowed_organizations: Option<Vec<String>>,
}

/// Trusted token issuer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Display / key-manager name.
    pub name: String,
    /// Expected `iss` claim.
    pub issuer: String,
    pub certificate_alias: Option<String>,
    pub certificate_pem: Option<String>,
    pub jwks_url: Option<String>,
    pub consumer_key_claim: String,
    pub validate_subscriptions: bool,
    /// `None` means every environment is allowed.
    pub allowed_environments: Option<Vec<String>>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            issuer: String::new(),
            certificate_alias: None,
            certificate_pem: None,
            jwks_url: None,
            consumer_key_claim: "consumerKey".to_string(),
            validate_subscriptions: true,
            allowed_environments: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub url: Option<String>,
    pub timeout_ms: u64,
    /// An exchanged token is reused only while it has more than this many seconds left.
    pub expiry_skew_secs: i64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 2_000,
            expiry_skew_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyServiceConfig {
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for PolicyServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 2_000,
        }
    }
}

impl EnforcerConfig {
    /// Load from a YAML file, apply `ENFORCER_*` overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_overrides(|k| std::env::var(k).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus `ENFORCER_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|k| std::env::var(k).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Invalid enforcer YAML")
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENFORCER_GATEWAY_ENVIRONMENT") {
            self.gateway_environment = v;
        }
        if let Some(v) = lookup("ENFORCER_AUTH_HEADER") {
            self.auth_header = v.to_ascii_lowercase();
        }
        if let Some(v) = lookup("ENFORCER_API_KEY_HEADER") {
            self.api_key_header = v.to_ascii_lowercase();
        }
        if let Some(v) = lookup("ENFORCER_INTERNAL_KEY_HEADER") {
            self.internal_key_header = v.to_ascii_lowercase();
        }
        if let Some(v) = lookup("ENFORCER_CLOCK_SKEW_SECS").and_then(|s| s.parse().ok()) {
            self.jwt.clock_skew_secs = v;
        }
        if let Some(v) = lookup("ENFORCER_CACHE_ENABLED").and_then(|s| s.parse().ok()) {
            self.cache.enabled = v;
        }
        if let Some(v) = lookup("ENFORCER_CACHE_CAPACITY").and_then(|s| s.parse().ok()) {
            self.cache.capacity = v;
        }
        if let Some(v) = lookup("ENFORCER_CACHE_TTL_SECS").and_then(|s| s.parse().ok()) {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = lookup("ENFORCER_ENVIRONMENT_RELAXED").and_then(|s| s.parse().ok()) {
            self.environment.relaxed = v;
        }
        if let Some(v) = lookup("ENFORCER_EXCHANGE_URL") {
            self.exchange.url = Some(v);
        }
        if let Some(v) = lookup("ENFORCER_POLICY_SERVICE_URL") {
            self.policy_service.url = Some(v);
        }
    }

    /// Reject configurations that cannot be enforced safely.
    ///
    /// Backend generator names are checked against a registry separately
    /// (see [`crate::security::backend::GeneratorRegistry::resolve`]).
    pub fn validate(&self) -> Result<()> {
        if self.opaque_key_prefix.is_empty() {
            bail!("opaque_key_prefix must not be empty");
        }
        if self.cache.capacity == 0 {
            bail!("cache.capacity must be > 0");
        }
        if self.jwt.clock_skew_secs < 0 {
            bail!("jwt.clock_skew_secs must not be negative");
        }
        if self.jwt.allowed_algorithms.is_empty() {
            bail!("jwt.allowed_algorithms must not be empty");
        }
        for alg in &self.jwt.allowed_algorithms {
            if !crate::security::jwt::is_rsa_algorithm(*alg) {
                bail!("jwt.allowed_algorithms: {:?} is not an RSA signature algorithm", alg);
            }
        }
        for issuer in &self.issuers {
            if issuer.issuer.is_empty() {
                bail!("issuer '{}' has an empty issuer value", issuer.name);
            }
            if issuer.certificate_pem.is_none() && issuer.jwks_url.is_none() {
                bail!(
                    "issuer '{}' needs either certificate_pem or jwks_url",
                    issuer.name
                );
            }
        }
        if self.backend_jwt.enabled && self.backend_jwt.generator.trim().is_empty() {
            bail!("backend_jwt.generator must name a registered generator");
        }
        Ok(())
    }
}
