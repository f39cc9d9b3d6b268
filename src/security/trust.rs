//! Trust material: public keys used to verify token signatures.
//!
//! Keys are resolved per issuer. A token's `kid` header (or the issuer's
//! configured certificate alias) selects a specific key; when neither is
//! present and the issuer has exactly one key, that key is used.
//!
//! Two providers are included:
//! - [`StaticTrustStore`] holds PEM public keys loaded at startup.
//! - [`JwksTrustStore`] fetches RSA keys from a JWKS endpoint and refreshes
//!   them on a TTL. Concurrent refreshes are debounced so only one thread
//!   performs the HTTP call.

use crate::config::IssuerConfig;
use crate::security::issuer::IssuerPolicy;
use anyhow::{bail, Context, Result};
use jsonwebtoken::DecodingKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Resolves the verification key for an issuer.
pub trait TrustMaterialProvider: Send + Sync {
    /// `alias` is the token's `kid`, if any.
    fn resolve_public_key(&self, issuer: &IssuerPolicy, alias: Option<&str>) -> Option<DecodingKey>;
}

#[derive(Clone, Default)]
struct IssuerKeys {
    by_alias: HashMap<String, DecodingKey>,
    default: Option<DecodingKey>,
}

impl IssuerKeys {
    fn lookup(&self, alias: Option<&str>, configured_alias: Option<&str>) -> Option<DecodingKey> {
        if let Some(key) = alias.and_then(|a| self.by_alias.get(a)) {
            return Some(key.clone());
        }
        if let Some(key) = configured_alias.and_then(|a| self.by_alias.get(a)) {
            return Some(key.clone());
        }
        if let Some(key) = &self.default {
            return Some(key.clone());
        }
        if self.by_alias.len() == 1 {
            return self.by_alias.values().next().cloned();
        }
        None
    }
}

/// PEM public keys configured per issuer.
#[derive(Clone, Default)]
pub struct StaticTrustStore {
    issuers: HashMap<String, IssuerKeys>,
}

impl StaticTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an RSA public key (SPKI or PKCS#1 PEM) for `issuer`.
    pub fn add_pem(&mut self, issuer: &str, alias: Option<&str>, pem: &str) -> Result<()> {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .with_context(|| format!("Invalid RSA public key for issuer {issuer}"))?;
        self.add_key(issuer, alias, key);
        Ok(())
    }

    pub fn add_key(&mut self, issuer: &str, alias: Option<&str>, key: DecodingKey) {
        let entry = self.issuers.entry(issuer.to_string()).or_default();
        match alias {
            Some(alias) => {
                entry.by_alias.insert(alias.to_string(), key);
            }
            None => entry.default = Some(key),
        }
    }

    pub fn with_pem(mut self, issuer: &str, alias: Option<&str>, pem: &str) -> Result<Self> {
        self.add_pem(issuer, alias, pem)?;
        Ok(self)
    }
}

impl TrustMaterialProvider for StaticTrustStore {
    fn resolve_public_key(&self, issuer: &IssuerPolicy, alias: Option<&str>) -> Option<DecodingKey> {
        self.issuers
            .get(&issuer.issuer)?
            .lookup(alias, issuer.certificate_alias.as_deref())
    }
}

/// Require HTTPS, except for exact `localhost` / `127.0.0.1`.
fn validate_jwks_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw).with_context(|| format!("JWKS URL is invalid: {raw}"))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => match parsed.host_str() {
            Some("localhost") | Some("127.0.0.1") => Ok(()),
            Some(_) => bail!("JWKS URL must use HTTPS (HTTP only allowed for localhost/127.0.0.1): {raw}"),
            None => bail!("JWKS URL must have a valid hostname: {raw}"),
        },
        _ => bail!("JWKS URL must use HTTPS or HTTP (for localhost only): {raw}"),
    }
}

/// RSA keys from a JWKS endpoint for a single issuer.
pub struct JwksTrustStore {
    issuer: String,
    jwks_url: String,
    cache_ttl: Duration,
    request_timeout: Duration,
    // (last refresh, kid -> key)
    keys: Mutex<(Option<Instant>, HashMap<String, DecodingKey>)>,
    refresh_in_progress: AtomicBool,
}

impl JwksTrustStore {
    pub fn new(issuer: impl Into<String>, jwks_url: impl Into<String>) -> Result<Self> {
        let jwks_url = jwks_url.into();
        validate_jwks_url(&jwks_url)?;
        Ok(Self {
            issuer: issuer.into(),
            jwks_url,
            cache_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_millis(200),
            keys: Mutex::new((None, HashMap::new())),
            refresh_in_progress: AtomicBool::new(false),
        })
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Number of keys currently held.
    pub fn key_count(&self) -> usize {
        self.keys.lock().1.len()
    }

    fn needs_refresh(&self) -> bool {
        let guard = self.keys.lock();
        match guard.0 {
            Some(at) => at.elapsed() >= self.cache_ttl || guard.1.is_empty(),
            None => true,
        }
    }

    /// Refresh the key set if stale. Only one thread fetches; others wait
    /// briefly and then read whatever is cached.
    pub fn refresh_if_needed(&self) {
        if !self.needs_refresh() {
            return;
        }
        if self
            .refresh_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            let start = Instant::now();
            let limit = self.request_timeout * 2 + Duration::from_millis(100);
            let mut wait_ms = 10;
            while self.refresh_in_progress.load(Ordering::Acquire) {
                if start.elapsed() >= limit {
                    warn!(issuer = %self.issuer, "JWKS refresh still running, using cached keys");
                    return;
                }
                std::thread::sleep(Duration::from_millis(wait_ms));
                wait_ms = (wait_ms * 2).min(100);
            }
            return;
        }

        let started = Instant::now();
        let fetched = self.fetch();
        match fetched {
            Ok(new_keys) => {
                let count = new_keys.len();
                *self.keys.lock() = (Some(Instant::now()), new_keys);
                debug!(
                    issuer = %self.issuer,
                    keys = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "JWKS refreshed"
                );
            }
            Err(e) => {
                warn!(issuer = %self.issuer, error = %e, "JWKS refresh failed");
            }
        }
        self.refresh_in_progress.store(false, Ordering::Release);
    }

    fn fetch(&self) -> Result<HashMap<String, DecodingKey>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .context("Failed to build JWKS client")?;
        let mut last_err = None;
        let mut body = None;
        for _ in 0..2 {
            match client.get(&self.jwks_url).send().and_then(|r| r.error_for_status()) {
                Ok(resp) => match resp.text() {
                    Ok(text) => {
                        body = Some(text);
                        break;
                    }
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
        }
        let body = match (body, last_err) {
            (Some(b), _) => b,
            (None, Some(e)) => return Err(e).context("JWKS request failed"),
            (None, None) => bail!("JWKS request failed"),
        };
        parse_jwks(&body)
    }
}

/// Parse RSA keys out of a JWKS document. Non-RSA keys are skipped.
pub fn parse_jwks(body: &str) -> Result<HashMap<String, DecodingKey>> {
    let parsed: serde_json::Value = serde_json::from_str(body).context("JWKS is not JSON")?;
    let mut keys = HashMap::new();
    let Some(entries) = parsed.get("keys").and_then(|v| v.as_array()) else {
        return Ok(keys);
    };
    for k in entries {
        let kty = k.get("kty").and_then(|v| v.as_str()).unwrap_or("");
        if !kty.eq_ignore_ascii_case("RSA") {
            continue;
        }
        if let Some(alg) = k.get("alg").and_then(|v| v.as_str()) {
            if !alg.starts_with("RS") && !alg.starts_with("PS") {
                continue;
            }
        }
        let kid = k.get("kid").and_then(|v| v.as_str()).unwrap_or("");
        let (Some(n), Some(e)) = (
            k.get("n").and_then(|v| v.as_str()),
            k.get("e").and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        if let Ok(key) = DecodingKey::from_rsa_components(n, e) {
            keys.insert(kid.to_string(), key);
        }
    }
    Ok(keys)
}

impl TrustMaterialProvider for JwksTrustStore {
    fn resolve_public_key(&self, issuer: &IssuerPolicy, alias: Option<&str>) -> Option<DecodingKey> {
        if issuer.issuer != self.issuer {
            return None;
        }
        self.refresh_if_needed();
        let guard = self.keys.lock();
        let keys = &guard.1;
        if let Some(key) = alias.and_then(|a| keys.get(a)) {
            return Some(key.clone());
        }
        if keys.len() == 1 {
            return keys.values().next().cloned();
        }
        None
    }
}

/// Tries each provider in order.
#[derive(Clone, Default)]
pub struct CompositeTrust {
    providers: Vec<Arc<dyn TrustMaterialProvider>>,
}

impl CompositeTrust {
    pub fn new(providers: Vec<Arc<dyn TrustMaterialProvider>>) -> Self {
        Self { providers }
    }

    pub fn push(&mut self, provider: Arc<dyn TrustMaterialProvider>) {
        self.providers.push(provider);
    }

    /// Static PEM keys for issuers that configure one, plus one JWKS store per `jwks_url`.
    pub fn from_configs(configs: &[IssuerConfig]) -> Result<Self> {
        let mut store = StaticTrustStore::new();
        let mut providers: Vec<Arc<dyn TrustMaterialProvider>> = Vec::new();
        for config in configs {
            if let Some(pem) = &config.certificate_pem {
                store.add_pem(&config.issuer, config.certificate_alias.as_deref(), pem)?;
            }
            if let Some(url) = &config.jwks_url {
                providers.push(Arc::new(JwksTrustStore::new(config.issuer.clone(), url.clone())?));
            }
        }
        providers.insert(0, Arc::new(store));
        Ok(Self { providers })
    }
}

impl TrustMaterialProvider for CompositeTrust {
    fn resolve_public_key(&self, issuer: &IssuerPolicy, alias: Option<&str>) -> Option<DecodingKey> {
        self.providers
            .iter()
            .find_map(|p| p.resolve_public_key(issuer, alias))
    }
}
