//! # Request and Authentication Context
//!
//! [`RequestContext`] is the single mutable, request-scoped structure that
//! flows through the enforcement pipeline. It carries the lower-cased request
//! headers, the matched API and resource descriptors, and collects the
//! outputs downstream components consume: response headers (for example the
//! generated backend credential) and metadata entries for rate limiting.
//!
//! [`AuthenticationContext`] is the result produced by whichever
//! authenticator succeeds. It is returned to the caller and never retained by
//! the engine.

use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tier name meaning "no limits applied".
pub const UNLIMITED_TIER: &str = "Unlimited";
/// Tier assigned to unsecured resources.
pub const UNAUTHENTICATED_TIER: &str = "Unauthenticated";
/// End user recorded for unsecured requests.
pub const ANONYMOUS_USER: &str = "anonymous";
/// Lifecycle state of APIs that bypass authentication entirely.
pub const PROTOTYPED_STATE: &str = "PROTOTYPED";

/// Production / sandbox classification of both tokens and deployments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    #[default]
    Production,
    Sandbox,
}

impl KeyType {
    /// Parse a `keytype` claim. Anything other than `SANDBOX` is production.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("sandbox") {
            KeyType::Sandbox
        } else {
            KeyType::Production
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Production => "PRODUCTION",
            KeyType::Sandbox => "SANDBOX",
        }
    }
}

/// Security schemes an API can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityScheme {
    /// Self-contained signed bearer tokens.
    OAuth2,
    /// API keys presented in the API key header.
    ApiKey,
}

/// The matched API, as resolved by the proxy before the request reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiDescriptor {
    pub uuid: String,
    pub name: String,
    pub version: String,
    /// Context / base path, e.g. `/petstore/1.0.0`.
    pub base_path: String,
    pub organization_id: String,
    /// Gateway environment the API is deployed to.
    pub environment: String,
    pub deployment_type: KeyType,
    /// API-level tier.
    pub tier: String,
    pub lifecycle_state: Option<String>,
    pub security: Vec<SecurityScheme>,
    /// Per-API override of the auth header name.
    pub auth_header: Option<String>,
}

impl Default for ApiDescriptor {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            name: String::new(),
            version: String::new(),
            base_path: String::new(),
            organization_id: String::new(),
            environment: "Default".to_string(),
            deployment_type: KeyType::Production,
            tier: UNLIMITED_TIER.to_string(),
            lifecycle_state: None,
            security: vec![SecurityScheme::OAuth2],
            auth_header: None,
        }
    }
}

impl ApiDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn supports(&self, scheme: SecurityScheme) -> bool {
        self.security.contains(&scheme)
    }

    pub fn is_prototyped(&self) -> bool {
        self.lifecycle_state
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(PROTOTYPED_STATE))
    }
}

/// The matched operation within the API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub path: String,
    pub method: Method,
    /// Scopes a token must carry to call this resource.
    pub scopes: Vec<String>,
    pub security_disabled: bool,
}

impl ResourceDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            scopes: Vec::new(),
            security_disabled: false,
        }
    }
}

/// Request-scoped state owned by a single call through the engine.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: HashMap<String, String>,
    /// Peer address reported by the transport.
    pub peer_address: Option<String>,
    pub api: ApiDescriptor,
    pub resource: ResourceDescriptor,
    /// Headers the proxy should add to the upstream request.
    pub response_headers: BTreeMap<String, String>,
    /// Metadata consumed by rate limiting and analytics.
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new(api: ApiDescriptor, resource: ResourceDescriptor) -> Self {
        Self {
            api,
            resource,
            ..Self::default()
        }
    }

    /// Builder-style header insertion. Header names are lower-cased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_peer_address(mut self, addr: impl Into<String>) -> Self {
        self.peer_address = Some(addr.into());
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.headers.get(name) {
            return Some(v.as_str());
        }
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Whether this is a websocket upgrade request.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
    }

    /// Client IP: first hop of `x-forwarded-for`, else the peer address.
    pub fn client_ip(&self) -> Option<String> {
        if let Some(xff) = self.header("x-forwarded-for") {
            if let Some(first) = xff.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return Some(first.to_string());
            }
        }
        self.peer_address.clone()
    }
}

/// Application identity resolved from claims or the policy store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationIdentity {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub owner: String,
    pub tier: String,
}

/// Output of a successful (or soft-failed) authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationContext {
    pub authenticated: bool,
    /// Which authenticator produced this context.
    pub authenticator: String,
    pub username: String,
    /// Token identifier (jti or signature), or the client IP for unsecured calls.
    pub token_id: String,
    /// Subscription tier.
    pub tier: String,
    pub key_type: KeyType,
    pub application: ApplicationIdentity,
    pub subscriber: String,
    pub subscriber_tenant_domain: String,
    pub api_name: String,
    pub api_uuid: String,
    pub api_version: String,
    pub api_publisher: String,
    pub api_tier: String,
    pub consumer_key: Option<String>,
    pub content_aware: bool,
    pub stop_on_quota_reach: bool,
    pub spike_arrest_limit: i64,
    pub spike_arrest_unit: Option<String>,
    /// Backend credential forwarded upstream, when generation is enabled.
    #[serde(skip_serializing)]
    pub backend_credential: Option<String>,
    /// True once the resource's scope requirement was checked and satisfied.
    pub scopes_validated: bool,
}

impl AuthenticationContext {
    /// Context for resources with security disabled (and prototyped APIs).
    pub fn anonymous(req: &RequestContext) -> Self {
        let client_ip = req.client_ip().unwrap_or_default();
        Self {
            authenticated: true,
            authenticator: "unsecured".to_string(),
            username: ANONYMOUS_USER.to_string(),
            token_id: client_ip.clone(),
            tier: UNAUTHENTICATED_TIER.to_string(),
            key_type: req.api.deployment_type,
            application: ApplicationIdentity {
                uuid: client_ip,
                tier: UNLIMITED_TIER.to_string(),
                ..ApplicationIdentity::default()
            },
            subscriber: ANONYMOUS_USER.to_string(),
            api_name: req.api.name.clone(),
            api_uuid: req.api.uuid.clone(),
            api_version: req.api.version.clone(),
            api_tier: req.api.tier.clone(),
            stop_on_quota_reach: true,
            ..Self::default()
        }
    }

    /// Unauthenticated context returned by soft failures.
    pub fn unauthenticated(req: &RequestContext, authenticator: &str) -> Self {
        Self {
            authenticated: false,
            authenticator: authenticator.to_string(),
            api_name: req.api.name.clone(),
            api_uuid: req.api.uuid.clone(),
            api_version: req.api.version.clone(),
            ..Self::default()
        }
    }
}
