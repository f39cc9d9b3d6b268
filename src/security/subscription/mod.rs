//! Subscription authorization.
//!
//! Decides whether the caller's application is subscribed to the invoked API
//! and with which tier. The decision comes from, in order of preference:
//!
//! 1. the issuer's policy, when it disables subscription validation
//!    (an anonymous `anon:<issuer>` application on the unlimited tier),
//! 2. the token's own `subscribedAPIs` claim,
//! 3. the [`PolicyStore`] (signed tokens only).
//!
//! Whatever the path, the API's lifecycle state is checked last and a
//! blocked API always fails.

mod remote;
mod store;

pub use remote::HttpPolicyStore;
pub use store::{
    ApiInfo, InMemoryPolicyStore, PolicyStore, SubscriptionPolicy, SubscriptionState,
    API_BLOCKED_STATE,
};

use crate::context::{ApiDescriptor, ApplicationIdentity, KeyType, UNLIMITED_TIER};
use crate::error::{codes, AuthError};
use crate::security::jwt::ValidatedToken;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Quota type marking bandwidth (content-aware) policies.
pub const BANDWIDTH_QUOTA_TYPE: &str = "bandwidthVolume";

/// Which authenticator the token arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFlow {
    SignedToken,
    ApiKey,
    InternalKey,
}

/// Request sent to the policy store's subscription validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQuery {
    pub organization_id: String,
    pub api_uuid: String,
    pub api_context: String,
    pub api_version: String,
    pub consumer_key: String,
    pub key_manager: String,
}

/// Result of subscription authorization for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionDecision {
    pub authorized: bool,
    /// Set when `authorized` is false.
    pub failure_code: Option<u32>,
    pub tier: String,
    pub application: ApplicationIdentity,
    pub key_type: KeyType,
    pub publisher: String,
    pub subscriber: String,
    pub subscriber_tenant_domain: String,
    pub consumer_key: Option<String>,
    pub content_aware: bool,
    pub stop_on_quota_reach: bool,
    pub spike_arrest_limit: i64,
    pub spike_arrest_unit: Option<String>,
}

impl Default for SubscriptionDecision {
    fn default() -> Self {
        Self {
            authorized: false,
            failure_code: None,
            tier: String::new(),
            application: ApplicationIdentity::default(),
            key_type: KeyType::Production,
            publisher: String::new(),
            subscriber: String::new(),
            subscriber_tenant_domain: String::new(),
            consumer_key: None,
            content_aware: false,
            stop_on_quota_reach: true,
            spike_arrest_limit: 0,
            spike_arrest_unit: None,
        }
    }
}

impl SubscriptionDecision {
    pub fn denied(code: u32) -> Self {
        Self {
            failure_code: Some(code),
            ..Self::default()
        }
    }

    /// Error for a denied decision.
    pub fn to_error(&self) -> AuthError {
        match self.failure_code {
            Some(codes::API_BLOCKED) => AuthError::api_blocked(),
            Some(codes::SUBSCRIPTION_BLOCKED) => AuthError::subscription_blocked(),
            Some(codes::SUBSCRIPTION_INACTIVE) => AuthError::subscription_inactive(),
            Some(code) if code != codes::RESOURCE_FORBIDDEN => AuthError::Forbidden {
                code,
                message: AuthError::forbidden().to_string(),
            },
            _ => AuthError::forbidden(),
        }
    }
}

/// Deterministic application UUID for anonymous issuer applications.
pub fn anonymous_application_uuid(label: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, label.as_bytes()).to_string()
}

fn claim_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
}

/// Resolves [`SubscriptionDecision`]s.
pub struct SubscriptionAuthorizer {
    store: Arc<dyn PolicyStore>,
}

impl SubscriptionAuthorizer {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    /// Authorize `token` for `api`, then enforce the API's lifecycle state.
    pub fn authorize(
        &self,
        api: &ApiDescriptor,
        token: &ValidatedToken,
        flow: TokenFlow,
    ) -> Result<SubscriptionDecision, AuthError> {
        let key_type = KeyType::parse(token.parsed.claim_str("keytype").unwrap_or("PRODUCTION"));
        let decision = if !token.issuer.validate_subscriptions {
            self.anonymous(&token.issuer.name, key_type)
        } else {
            match self.from_claims(api, token, flow, key_type)? {
                Some(decision) => decision,
                None if flow == TokenFlow::SignedToken => self.remote(api, token)?,
                None => {
                    debug!(api = %api.name, ?flow, "token carries no subscription claim");
                    return Err(AuthError::forbidden());
                }
            }
        };
        self.check_lifecycle(api)?;
        Ok(decision)
    }

    /// Fail when the API is blocked. The store is authoritative; the
    /// descriptor's state is used when the store does not know the API.
    pub fn check_lifecycle(&self, api: &ApiDescriptor) -> Result<(), AuthError> {
        let blocked = match self.store.get_api(&api.organization_id, &api.uuid)? {
            Some(info) => info.is_blocked(),
            None => api
                .lifecycle_state
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(API_BLOCKED_STATE)),
        };
        if blocked {
            debug!(api = %api.name, uuid = %api.uuid, "API is blocked");
            return Err(AuthError::api_blocked());
        }
        Ok(())
    }

    fn anonymous(&self, issuer_name: &str, key_type: KeyType) -> SubscriptionDecision {
        let label = format!("anon:{issuer_name}");
        let uuid = anonymous_application_uuid(&label);
        SubscriptionDecision {
            authorized: true,
            tier: UNLIMITED_TIER.to_string(),
            application: ApplicationIdentity {
                id: uuid.clone(),
                uuid,
                name: label.clone(),
                owner: label.clone(),
                tier: UNLIMITED_TIER.to_string(),
            },
            key_type,
            subscriber: label,
            ..SubscriptionDecision::default()
        }
    }

    /// `Ok(None)` when the token has no subscription list at all.
    fn from_claims(
        &self,
        api: &ApiDescriptor,
        token: &ValidatedToken,
        flow: TokenFlow,
        key_type: KeyType,
    ) -> Result<Option<SubscriptionDecision>, AuthError> {
        let claims = &token.parsed.claims;
        let Some(list) = claims
            .get("subscribedAPIs")
            .or_else(|| claims.get("subscribedApis"))
            .and_then(Value::as_array)
        else {
            return Ok(None);
        };

        // Internal keys match by context, API keys by name or context, signed tokens by name.
        let entry = list.iter().filter_map(Value::as_object).find(|entry| {
            if claim_str(entry, &["version"]) != Some(api.version.as_str()) {
                return false;
            }
            let by_name = || claim_str(entry, &["name"]) == Some(api.name.as_str());
            let by_context = || {
                claim_str(entry, &["context"])
                    .is_some_and(|c| context_matches(c, &api.base_path, &api.version))
            };
            match flow {
                TokenFlow::InternalKey => by_context(),
                TokenFlow::ApiKey => by_name() || by_context(),
                TokenFlow::SignedToken => by_name(),
            }
        });
        let Some(entry) = entry else {
            debug!(api = %api.name, version = %api.version, "API not in token subscription list");
            return Err(AuthError::forbidden());
        };

        let tier = claim_str(entry, &["subscriptionTier", "tier"])
            .unwrap_or(UNLIMITED_TIER)
            .to_string();
        let application: ApplicationIdentity = claims
            .get("application")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let tier_info = claims
            .get("tierInfo")
            .and_then(|t| t.get(&tier))
            .and_then(Value::as_object);

        Ok(Some(SubscriptionDecision {
            authorized: true,
            subscriber: application.owner.clone(),
            application,
            key_type,
            publisher: claim_str(entry, &["publisher"]).unwrap_or_default().to_string(),
            subscriber_tenant_domain: claim_str(entry, &["subscriberTenantDomain"])
                .unwrap_or_default()
                .to_string(),
            consumer_key: token.result.consumer_key.clone(),
            content_aware: tier_info
                .and_then(|t| claim_str(t, &["tierQuotaType"]))
                .is_some_and(|q| q == BANDWIDTH_QUOTA_TYPE),
            stop_on_quota_reach: tier_info
                .and_then(|t| t.get("stopOnQuotaReach"))
                .and_then(Value::as_bool)
                .unwrap_or(true),
            spike_arrest_limit: tier_info
                .and_then(|t| t.get("spikeArrestLimit"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            spike_arrest_unit: tier_info
                .and_then(|t| claim_str(t, &["spikeArrestUnit"]))
                .map(str::to_string),
            tier,
            ..SubscriptionDecision::default()
        }))
    }

    fn remote(&self, api: &ApiDescriptor, token: &ValidatedToken) -> Result<SubscriptionDecision, AuthError> {
        let Some(consumer_key) = token.result.consumer_key.clone() else {
            debug!(api = %api.name, "token identifies no consumer key");
            return Err(AuthError::forbidden());
        };
        let query = SubscriptionQuery {
            organization_id: api.organization_id.clone(),
            api_uuid: api.uuid.clone(),
            api_context: api.base_path.clone(),
            api_version: api.version.clone(),
            consumer_key: consumer_key.clone(),
            key_manager: token.issuer.name.clone(),
        };
        let mut decision = self.store.validate_subscription(&query)?;
        if !decision.authorized {
            return Err(decision.to_error());
        }
        if decision.consumer_key.is_none() {
            decision.consumer_key = Some(consumer_key);
        }
        Ok(decision)
    }
}

/// `context` may be the bare base path or the base path with the version appended.
fn context_matches(context: &str, base_path: &str, version: &str) -> bool {
    let context = context.trim_end_matches('/');
    let base = base_path.trim_end_matches('/');
    context == base || context == format!("{base}/{version}")
}
