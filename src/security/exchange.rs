//! Opaque API key exchange.
//!
//! Opaque keys look like `chp_<keyData><checksum>`: `keyData` is base64 of a
//! small JSON document carrying the secret under `"key"`, and `checksum` is
//! the six-character unpadded base64 of the big-endian CRC32 of `keyData`.
//!
//! A key whose checksum does not match is rejected locally. Otherwise the
//! SHA-256 of the secret is exchanged with a remote service for a
//! short-lived signed token, which is cached by hash and reused until it
//! nears expiry.

use crate::clock::Clock;
use crate::config::{CacheConfig, ExchangeConfig};
use crate::error::AuthError;
use crate::logging::mask_token;
use crate::security::cache::TtlLruCache;
use crate::security::jwt::ParsedToken;
use anyhow::Context;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const CHECKSUM_LEN: usize = 6;

/// Checksum of the key data portion of an opaque key.
pub fn checksum(key_data: &str) -> String {
    STANDARD_NO_PAD.encode(crc32fast::hash(key_data.as_bytes()).to_be_bytes())
}

/// Split `value` into key data and checksum and verify the checksum.
pub fn verify_checksum<'a>(value: &'a str, prefix: &str) -> Result<&'a str, AuthError> {
    let body = value
        .strip_prefix(prefix)
        .ok_or_else(AuthError::invalid_credentials)?;
    if body.len() <= CHECKSUM_LEN || !body.is_char_boundary(body.len() - CHECKSUM_LEN) {
        return Err(AuthError::invalid_credentials());
    }
    let (key_data, presented) = body.split_at(body.len() - CHECKSUM_LEN);
    if checksum(key_data) != presented {
        debug!(key = %mask_token(value), "opaque key checksum mismatch");
        return Err(AuthError::invalid_credentials());
    }
    Ok(key_data)
}

#[derive(Deserialize)]
struct KeyData {
    key: String,
}

/// Hex SHA-256 of the secret inside the key data.
pub fn key_hash(key_data: &str) -> Result<String, AuthError> {
    let decoded = STANDARD
        .decode(key_data)
        .or_else(|_| STANDARD_NO_PAD.decode(key_data))
        .map_err(|_| AuthError::invalid_credentials())?;
    let data: KeyData =
        serde_json::from_slice(&decoded).map_err(|_| AuthError::invalid_credentials())?;
    Ok(hex::encode(Sha256::digest(data.key.as_bytes())))
}

/// Remote exchange of a key hash for a signed token.
pub trait KeyExchange: Send + Sync {
    fn exchange(&self, key_hash: &str) -> Result<String, AuthError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    api_key_hash: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeResponse {
    access_token: String,
}

/// Exchange over HTTP: `POST {"apiKeyHash": ..}` returning `{"accessToken": ..}`.
pub struct HttpKeyExchange {
    url: Url,
    client: Client,
}

impl HttpKeyExchange {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid exchange URL: {url}"))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build key exchange client")?;
        Ok(Self { url, client })
    }

    /// `Ok(None)` when no URL is configured.
    pub fn from_config(config: &ExchangeConfig) -> anyhow::Result<Option<Self>> {
        match &config.url {
            Some(url) => Ok(Some(Self::new(url, Duration::from_millis(config.timeout_ms))?)),
            None => Ok(None),
        }
    }
}

impl KeyExchange for HttpKeyExchange {
    fn exchange(&self, key_hash: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&ExchangeRequest {
                api_key_hash: key_hash,
            })
            .send()
            .map_err(|e| AuthError::internal(format!("key exchange request failed: {e}")))?;
        let status = response.status();
        if status.is_client_error() {
            debug!(status = status.as_u16(), "key exchange rejected the key");
            return Err(AuthError::invalid_credentials());
        }
        if !status.is_success() {
            return Err(AuthError::internal(format!("key exchange returned {status}")));
        }
        let body: ExchangeResponse = response
            .json()
            .map_err(|e| AuthError::internal(format!("key exchange response invalid: {e}")))?;
        Ok(body.access_token)
    }
}

/// Verifies opaque keys and exchanges them, caching by key hash.
pub struct KeyExchangeClient {
    exchange: Arc<dyn KeyExchange>,
    cache: TtlLruCache<String, String>,
    clock: Arc<dyn Clock>,
    prefix: String,
    expiry_skew_secs: i64,
}

impl KeyExchangeClient {
    pub fn new(
        exchange: Arc<dyn KeyExchange>,
        prefix: impl Into<String>,
        config: &ExchangeConfig,
        cache_config: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            exchange,
            cache: TtlLruCache::from_config("exchanged_token", cache_config, Arc::clone(&clock)),
            clock,
            prefix: prefix.into(),
            expiry_skew_secs: config.expiry_skew_secs,
        }
    }

    pub fn cache(&self) -> &TtlLruCache<String, String> {
        &self.cache
    }

    /// Exchange an opaque key for a signed token.
    pub fn exchange(&self, opaque: &str) -> Result<String, AuthError> {
        let key_data = verify_checksum(opaque, &self.prefix)?;
        let hash = key_hash(key_data)?;
        if let Some(token) = self.cache.get(&hash) {
            if self.usable(&token) {
                return Ok(token);
            }
            self.cache.remove(&hash);
        }
        let token = self.exchange.exchange(&hash)?;
        if !self.usable(&token) {
            debug!("exchanged token is already expired");
            return Err(AuthError::invalid_credentials());
        }
        self.cache.insert(hash, token.clone());
        Ok(token)
    }

    /// Tokens without `exp` are usable; otherwise more than the skew must remain.
    fn usable(&self, token: &str) -> bool {
        match ParsedToken::parse(token) {
            Ok(parsed) => match parsed.expires_at() {
                Some(exp) => exp.saturating_sub(self.clock.now_secs()) > self.expiry_skew_secs,
                None => true,
            },
            Err(_) => false,
        }
    }
}
