//! Policy store interface and an in-memory implementation.
//!
//! The store is read-only from the engine's point of view. Data is kept in
//! sync by an external process; [`InMemoryPolicyStore`] exposes the setters
//! that process uses.

use super::{SubscriptionDecision, SubscriptionQuery};
use crate::context::{ApplicationIdentity, KeyType};
use crate::error::{codes, AuthError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of an API that blocks all traffic.
pub const API_BLOCKED_STATE: &str = "BLOCKED";

/// API as known to the policy store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiInfo {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub context: String,
    pub organization_id: String,
    pub lifecycle_state: String,
    pub publisher: String,
}

impl ApiInfo {
    pub fn is_blocked(&self) -> bool {
        self.lifecycle_state.eq_ignore_ascii_case(API_BLOCKED_STATE)
    }
}

/// Subscription (rate/quota) policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionPolicy {
    pub name: String,
    /// `requestCount` or `bandwidthVolume`.
    pub quota_type: String,
    pub stop_on_quota_reach: bool,
    pub spike_arrest_limit: i64,
    pub spike_arrest_unit: Option<String>,
}

impl SubscriptionPolicy {
    pub fn is_content_aware(&self) -> bool {
        self.quota_type == super::BANDWIDTH_QUOTA_TYPE
    }
}

/// Subscription states as stored by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    #[default]
    #[serde(alias = "ACTIVE")]
    Unblocked,
    Blocked,
    ProdOnlyBlocked,
    OnHold,
    Rejected,
}

/// Queries made by the subscription authorizer.
pub trait PolicyStore: Send + Sync {
    /// `Ok(None)` when the store does not know the API.
    fn get_api(&self, organization_id: &str, uuid: &str) -> Result<Option<ApiInfo>, AuthError>;

    fn get_subscription_policy(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<SubscriptionPolicy>, AuthError>;

    /// Resolve whether the consumer key's application may call the API.
    fn validate_subscription(&self, query: &SubscriptionQuery) -> Result<SubscriptionDecision, AuthError>;
}

#[derive(Debug, Clone)]
struct ApplicationKey {
    application: ApplicationIdentity,
    key_type: KeyType,
}

#[derive(Debug, Clone)]
struct Subscription {
    policy: String,
    state: SubscriptionState,
}

#[derive(Default)]
struct StoreData {
    // (org, uuid)
    apis: HashMap<(String, String), ApiInfo>,
    // (org, policy name)
    policies: HashMap<(String, String), SubscriptionPolicy>,
    // (key manager, consumer key)
    keys: HashMap<(String, String), ApplicationKey>,
    // (application uuid, api uuid)
    subscriptions: HashMap<(String, String), Subscription>,
}

/// Policy store held in memory.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    data: RwLock<StoreData>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_api(&self, api: ApiInfo) {
        let key = (api.organization_id.clone(), api.uuid.clone());
        self.data.write().apis.insert(key, api);
    }

    /// Change the lifecycle state of a known API. Returns `false` if the API is unknown.
    pub fn set_api_state(&self, organization_id: &str, uuid: &str, state: &str) -> bool {
        let mut data = self.data.write();
        match data.apis.get_mut(&(organization_id.to_string(), uuid.to_string())) {
            Some(api) => {
                api.lifecycle_state = state.to_string();
                true
            }
            None => false,
        }
    }

    pub fn upsert_policy(&self, organization_id: &str, policy: SubscriptionPolicy) {
        let key = (organization_id.to_string(), policy.name.clone());
        self.data.write().policies.insert(key, policy);
    }

    /// Register a consumer key issued by `key_manager` for an application.
    pub fn upsert_application_key(
        &self,
        key_manager: &str,
        consumer_key: &str,
        key_type: KeyType,
        application: ApplicationIdentity,
    ) {
        self.data.write().keys.insert(
            (key_manager.to_string(), consumer_key.to_string()),
            ApplicationKey {
                application,
                key_type,
            },
        );
    }

    pub fn upsert_subscription(
        &self,
        application_uuid: &str,
        api_uuid: &str,
        policy: &str,
        state: SubscriptionState,
    ) {
        self.data.write().subscriptions.insert(
            (application_uuid.to_string(), api_uuid.to_string()),
            Subscription {
                policy: policy.to_string(),
                state,
            },
        );
    }

    pub fn remove_subscription(&self, application_uuid: &str, api_uuid: &str) {
        self.data
            .write()
            .subscriptions
            .remove(&(application_uuid.to_string(), api_uuid.to_string()));
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn get_api(&self, organization_id: &str, uuid: &str) -> Result<Option<ApiInfo>, AuthError> {
        Ok(self
            .data
            .read()
            .apis
            .get(&(organization_id.to_string(), uuid.to_string()))
            .cloned())
    }

    fn get_subscription_policy(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<SubscriptionPolicy>, AuthError> {
        Ok(self
            .data
            .read()
            .policies
            .get(&(organization_id.to_string(), name.to_string()))
            .cloned())
    }

    fn validate_subscription(&self, query: &SubscriptionQuery) -> Result<SubscriptionDecision, AuthError> {
        let data = self.data.read();
        let Some(app_key) = data
            .keys
            .get(&(query.key_manager.clone(), query.consumer_key.clone()))
        else {
            return Ok(SubscriptionDecision::denied(codes::RESOURCE_FORBIDDEN));
        };
        let Some(subscription) = data
            .subscriptions
            .get(&(app_key.application.uuid.clone(), query.api_uuid.clone()))
        else {
            return Ok(SubscriptionDecision::denied(codes::RESOURCE_FORBIDDEN));
        };

        match subscription.state {
            SubscriptionState::Blocked => {
                return Ok(SubscriptionDecision::denied(codes::SUBSCRIPTION_BLOCKED));
            }
            SubscriptionState::OnHold | SubscriptionState::Rejected => {
                return Ok(SubscriptionDecision::denied(codes::SUBSCRIPTION_INACTIVE));
            }
            SubscriptionState::ProdOnlyBlocked if app_key.key_type == KeyType::Production => {
                return Ok(SubscriptionDecision::denied(codes::SUBSCRIPTION_BLOCKED));
            }
            _ => {}
        }

        let policy = data
            .policies
            .get(&(query.organization_id.clone(), subscription.policy.clone()));
        let publisher = data
            .apis
            .get(&(query.organization_id.clone(), query.api_uuid.clone()))
            .map(|a| a.publisher.clone())
            .unwrap_or_default();

        Ok(SubscriptionDecision {
            authorized: true,
            tier: subscription.policy.clone(),
            subscriber: app_key.application.owner.clone(),
            application: app_key.application.clone(),
            key_type: app_key.key_type,
            publisher,
            content_aware: policy.is_some_and(SubscriptionPolicy::is_content_aware),
            stop_on_quota_reach: policy.map_or(true, |p| p.stop_on_quota_reach),
            spike_arrest_limit: policy.map_or(0, |p| p.spike_arrest_limit),
            spike_arrest_unit: policy.and_then(|p| p.spike_arrest_unit.clone()),
            consumer_key: Some(query.consumer_key.clone()),
            ..SubscriptionDecision::default()
        })
    }
}
