//! Trusted issuer policies.
//!
//! Issuers are looked up by the token's `iss` claim. The registry is a
//! lock-free snapshot an external updater can replace while requests read it.

use crate::config::IssuerConfig;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Policy for one trusted token issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerPolicy {
    /// Display / key-manager name.
    pub name: String,
    /// Value of the `iss` claim.
    pub issuer: String,
    pub certificate_alias: Option<String>,
    /// Claim carrying the consumer key (falls back to `azp`).
    pub consumer_key_claim: String,
    pub validate_subscriptions: bool,
    /// `None` allows every environment; an empty list allows none.
    pub allowed_environments: Option<Vec<String>>,
}

impl IssuerPolicy {
    pub fn new(name: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            issuer: issuer.into(),
            certificate_alias: None,
            consumer_key_claim: "consumerKey".to_string(),
            validate_subscriptions: true,
            allowed_environments: None,
        }
    }

    pub fn allows_environment(&self, environment: &str) -> bool {
        match &self.allowed_environments {
            None => true,
            Some(allowed) => allowed.iter().any(|e| e == environment),
        }
    }
}

impl From<&IssuerConfig> for IssuerPolicy {
    fn from(config: &IssuerConfig) -> Self {
        Self {
            name: config.name.clone(),
            issuer: config.issuer.clone(),
            certificate_alias: config.certificate_alias.clone(),
            consumer_key_claim: config.consumer_key_claim.clone(),
            validate_subscriptions: config.validate_subscriptions,
            allowed_environments: config.allowed_environments.clone(),
        }
    }
}

/// Snapshot registry of issuer policies keyed by `iss`.
#[derive(Clone, Default)]
pub struct IssuerRegistry {
    inner: Arc<ArcSwap<HashMap<String, IssuerPolicy>>>,
}

impl IssuerRegistry {
    pub fn new(policies: impl IntoIterator<Item = IssuerPolicy>) -> Self {
        let map: HashMap<String, IssuerPolicy> = policies
            .into_iter()
            .map(|p| (p.issuer.clone(), p))
            .collect();
        Self {
            inner: Arc::new(ArcSwap::from_pointee(map)),
        }
    }

    pub fn from_configs(configs: &[IssuerConfig]) -> Self {
        Self::new(configs.iter().map(IssuerPolicy::from))
    }

    pub fn get(&self, issuer: &str) -> Option<IssuerPolicy> {
        self.inner.load().get(issuer).cloned()
    }

    /// Publish a complete replacement snapshot.
    pub fn replace(&self, policies: impl IntoIterator<Item = IssuerPolicy>) {
        let map: HashMap<String, IssuerPolicy> = policies
            .into_iter()
            .map(|p| (p.issuer.clone(), p))
            .collect();
        self.inner.store(Arc::new(map));
    }

    /// Add or replace one policy (copy-on-write).
    pub fn upsert(&self, policy: IssuerPolicy) {
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(policy.issuer.clone(), policy.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IssuerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.load();
        let mut issuers: Vec<&String> = snapshot.keys().collect();
        issuers.sort();
        f.debug_struct("IssuerRegistry")
            .field("issuers", &issuers)
            .finish()
    }
}
