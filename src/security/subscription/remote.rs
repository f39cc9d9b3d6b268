//! JSON-over-HTTP policy service client.
//!
//! Calls are blocking, bounded by a timeout, and never retried. Every
//! transport or decoding failure becomes [`AuthError::InternalError`].

use super::store::{ApiInfo, PolicyStore, SubscriptionPolicy};
use super::{SubscriptionDecision, SubscriptionQuery};
use crate::config::PolicyServiceConfig;
use crate::error::AuthError;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// [`PolicyStore`] backed by a remote policy service.
///
/// Endpoints, relative to the base URL:
/// - `POST subscriptions/validate`
/// - `GET apis/{org}/{uuid}` (404 means unknown)
/// - `GET policies/{org}/{name}` (404 means unknown)
pub struct HttpPolicyStore {
    base: Url,
    client: Client,
}

impl HttpPolicyStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid policy service URL: {base_url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Policy service URL cannot be a base: {base_url}");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build policy service client")?;
        Ok(Self { base, client })
    }

    /// `Ok(None)` when no URL is configured.
    pub fn from_config(config: &PolicyServiceConfig) -> Result<Option<Self>> {
        match &config.url {
            Some(url) => Ok(Some(Self::new(url, Duration::from_millis(config.timeout_ms))?)),
            None => Ok(None),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AuthError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| AuthError::internal("policy service URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, AuthError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| AuthError::internal(format!("policy service GET {url} failed: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| AuthError::internal(format!("policy service GET {url}: {e}")))?;
        response
            .json::<T>()
            .map(Some)
            .map_err(|e| AuthError::internal(format!("policy service GET {url}: bad body: {e}")))
    }
}

impl PolicyStore for HttpPolicyStore {
    fn get_api(&self, organization_id: &str, uuid: &str) -> Result<Option<ApiInfo>, AuthError> {
        let url = self.endpoint(&["apis", organization_id, uuid])?;
        self.get_optional(url)
    }

    fn get_subscription_policy(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<SubscriptionPolicy>, AuthError> {
        let url = self.endpoint(&["policies", organization_id, name])?;
        self.get_optional(url)
    }

    fn validate_subscription(&self, query: &SubscriptionQuery) -> Result<SubscriptionDecision, AuthError> {
        let url = self.endpoint(&["subscriptions", "validate"])?;
        debug!(api = %query.api_uuid, key_manager = %query.key_manager, "remote subscription validation");
        let response = self
            .client
            .post(url.clone())
            .json(query)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::internal(format!("policy service POST {url} failed: {e}")))?;
        response
            .json::<SubscriptionDecision>()
            .map_err(|e| AuthError::internal(format!("policy service POST {url}: bad body: {e}")))
    }
}
