//! Integration tests for subscription, lifecycle, environment and scope authorization
//!
//! # Test Coverage
//!
//! - Subscription from the token's `subscribedAPIs` claim, with tier details
//! - Subscription resolved through the policy store when the claim is absent
//! - Subscription states (blocked, on hold, production-only blocked)
//! - API lifecycle blocking from the store and from the descriptor
//! - Issuers that skip subscription validation
//! - Issuer environment allow-lists and key type vs deployment type
//! - Scope requirements
//! - Ordering: a blocked subscription is reported before scope or environment failures
//! - Unsecured resources, missing credentials, and the authenticator precedence

mod common;

use common::claims::{subscribed, unsubscribed};
use common::harness::{base_config, bearer, build, get_pets, Harness, API_UUID, ORG};
use common::tokens::{mint, KEY_MANAGER};
use enforcer::security::subscription::{
    anonymous_application_uuid, ApiInfo, SubscriptionPolicy, SubscriptionState,
};
use enforcer::{ApplicationIdentity, AuthError, KeyType};
use serde_json::json;

/// Register `ck-bob` for application `app-bob` subscribed to PetStore on Silver.
fn register_bob(h: &Harness, state: SubscriptionState) {
    h.store.upsert_application_key(
        KEY_MANAGER,
        "ck-bob",
        KeyType::Production,
        ApplicationIdentity {
            id: "12".into(),
            uuid: "app-bob".into(),
            name: "BobsPets".into(),
            owner: "bob".into(),
            tier: "Unlimited".into(),
        },
    );
    h.store.upsert_policy(
        ORG,
        SubscriptionPolicy {
            name: "Silver".into(),
            quota_type: "requestCount".into(),
            stop_on_quota_reach: true,
            spike_arrest_limit: 5,
            spike_arrest_unit: Some("min".into()),
        },
    );
    h.store
        .upsert_subscription("app-bob", API_UUID, "Silver", state);
}

fn petstore_info(state: &str) -> ApiInfo {
    ApiInfo {
        uuid: API_UUID.into(),
        name: "PetStore".into(),
        version: "1.0.0".into(),
        context: "/petstore".into(),
        organization_id: ORG.into(),
        lifecycle_state: state.into(),
        publisher: "admin".into(),
    }
}

#[test]
fn test_subscription_from_claims() {
    let h = build(base_config());
    let mut req = bearer(&mint(subscribed("jti-gold", "Gold")));
    let ctx = h.enforcer.authenticate(&mut req).unwrap();

    assert_eq!(ctx.tier, "Gold");
    assert_eq!(ctx.application.uuid, "app-uuid-1");
    assert_eq!(ctx.subscriber, "alice");
    assert_eq!(ctx.api_publisher, "admin");
    assert_eq!(ctx.subscriber_tenant_domain, "acme.com");
    assert_eq!(ctx.consumer_key.as_deref(), Some("ck-alice"));
    assert!(!ctx.content_aware);
    assert!(!ctx.stop_on_quota_reach);
    assert_eq!(ctx.spike_arrest_limit, 10);
    assert_eq!(ctx.spike_arrest_unit.as_deref(), Some("sec"));

    assert_eq!(
        req.metadata.get("ratelimit:subscription").map(String::as_str),
        Some("api-petstore:app-uuid-1")
    );
    assert_eq!(req.metadata.get("ratelimit:policy").map(String::as_str), Some("Gold"));
}

#[test]
fn test_bandwidth_tier_is_content_aware() {
    let h = build(base_config());
    let ctx = h
        .enforcer
        .authenticate(&mut bearer(&mint(subscribed("jti-bw", "Bandwidth"))))
        .unwrap();
    assert!(ctx.content_aware);
    assert!(ctx.stop_on_quota_reach);
}

#[test]
fn test_subscription_list_without_match_is_forbidden() {
    let h = build(base_config());
    let mut claims = subscribed("jti-other", "Gold");
    claims["subscribedAPIs"][0]["name"] = json!("Inventory");
    let err = h.enforcer.authenticate(&mut bearer(&mint(claims))).unwrap_err();
    assert_eq!(err.code(), 900908);
    assert_eq!(err.status().as_u16(), 403);

    // Same name, other version
    let mut claims = subscribed("jti-v2", "Gold");
    claims["subscribedAPIs"][0]["version"] = json!("2.0.0");
    assert_eq!(
        h.enforcer.authenticate(&mut bearer(&mint(claims))).unwrap_err().code(),
        900908
    );
}

#[test]
fn test_subscription_from_policy_store() {
    let h = build(base_config());
    register_bob(&h, SubscriptionState::Unblocked);

    let mut req = bearer(&mint(unsubscribed("jti-bob")));
    let ctx = h.enforcer.authenticate(&mut req).unwrap();
    assert_eq!(ctx.username, "bob@acme");
    assert_eq!(ctx.tier, "Silver");
    assert_eq!(ctx.application.uuid, "app-bob");
    assert_eq!(ctx.subscriber, "bob");
    assert_eq!(ctx.consumer_key.as_deref(), Some("ck-bob"));
    assert_eq!(ctx.spike_arrest_limit, 5);
    assert_eq!(
        req.metadata.get("ratelimit:subscription").map(String::as_str),
        Some("api-petstore:app-bob")
    );
}

#[test]
fn test_unknown_consumer_key_is_forbidden() {
    let h = build(base_config());
    let err = h
        .enforcer
        .authenticate(&mut bearer(&mint(unsubscribed("jti-nobody"))))
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden { code: 900908, .. }));
}

#[test]
fn test_subscription_states() {
    let cases = [
        (SubscriptionState::Blocked, 900907, 503),
        (SubscriptionState::OnHold, 900909, 403),
        (SubscriptionState::Rejected, 900909, 403),
        (SubscriptionState::ProdOnlyBlocked, 900907, 503),
    ];
    for (i, (state, code, status)) in cases.into_iter().enumerate() {
        let h = build(base_config());
        register_bob(&h, state);
        let raw = mint(unsubscribed(&format!("jti-state-{i}")));
        let err = h.enforcer.authenticate(&mut bearer(&raw)).unwrap_err();
        assert_eq!(err.code(), code, "{state:?}");
        assert_eq!(err.status().as_u16(), status, "{state:?}");
    }
}

#[test]
fn test_prod_only_blocked_allows_sandbox_keys() {
    let h = build(base_config());
    register_bob(&h, SubscriptionState::ProdOnlyBlocked);
    h.store.upsert_application_key(
        KEY_MANAGER,
        "ck-bob",
        KeyType::Sandbox,
        ApplicationIdentity {
            uuid: "app-bob".into(),
            owner: "bob".into(),
            ..ApplicationIdentity::default()
        },
    );
    let mut req = bearer(&mint(unsubscribed("jti-sandbox")));
    req.api.deployment_type = KeyType::Sandbox;
    let ctx = h.enforcer.authenticate(&mut req).unwrap();
    assert_eq!(ctx.key_type, KeyType::Sandbox);
}

#[test]
fn test_blocked_api_in_store() {
    let h = build(base_config());
    h.store.upsert_api(petstore_info("PUBLISHED"));
    let raw = mint(subscribed("jti-lifecycle", "Gold"));
    assert!(h.enforcer.authenticate(&mut bearer(&raw)).is_ok());

    assert!(h.store.set_api_state(ORG, API_UUID, "BLOCKED"));
    let err = h.enforcer.authenticate(&mut bearer(&raw)).unwrap_err();
    assert!(matches!(err, AuthError::Blocked { code: 900800, .. }));
    assert_eq!(err.status().as_u16(), 503);
}

#[test]
fn test_blocked_api_from_descriptor() {
    let h = build(base_config());
    let mut req = bearer(&mint(subscribed("jti-desc", "Gold")));
    req.api.lifecycle_state = Some("BLOCKED".into());
    assert_eq!(h.enforcer.authenticate(&mut req).unwrap_err().code(), 900800);

    // The store wins over the descriptor
    h.store.upsert_api(petstore_info("PUBLISHED"));
    let mut req = bearer(&mint(subscribed("jti-desc", "Gold")));
    req.api.lifecycle_state = Some("BLOCKED".into());
    assert!(h.enforcer.authenticate(&mut req).is_ok());
}

#[test]
fn test_issuer_without_subscription_validation() {
    let mut config = base_config();
    config.issuers[0].validate_subscriptions = false;
    let h = build(config);

    let mut req = bearer(&mint(unsubscribed("jti-anon")));
    let ctx = h.enforcer.authenticate(&mut req).unwrap();
    let label = format!("anon:{KEY_MANAGER}");
    assert_eq!(ctx.tier, "Unlimited");
    assert_eq!(ctx.application.name, label);
    assert_eq!(ctx.application.uuid, anonymous_application_uuid(&label));
    // Unlimited tier writes no rate limit metadata
    assert!(req.metadata.is_empty());
}

#[test]
fn test_issuer_environment_allow_list() {
    let mut config = base_config();
    config.issuers[0].allowed_environments = Some(vec!["Production".into()]);
    let h = build(config);

    let mut req = bearer(&mint(subscribed("jti-env", "Gold")));
    let err = h.enforcer.authenticate(&mut req).unwrap_err();
    assert!(matches!(err, AuthError::InvalidEnvironment { .. }));

    let mut req = bearer(&mint(subscribed("jti-env", "Gold")));
    req.api.environment = "Production".into();
    assert!(h.enforcer.authenticate(&mut req).is_ok());
}

#[test]
fn test_key_type_must_match_deployment() {
    let h = build(base_config());
    let mut claims = subscribed("jti-sb", "Gold");
    claims["keytype"] = json!("SANDBOX");
    let err = h.enforcer.authenticate(&mut bearer(&mint(claims))).unwrap_err();
    assert!(matches!(err, AuthError::InvalidEnvironment { .. }));

    let mut req = bearer(&mint(subscribed("jti-prod", "Gold")));
    req.api.deployment_type = KeyType::Sandbox;
    assert!(h.enforcer.authenticate(&mut req).is_err());
}

#[test]
fn test_relaxed_key_type_enforcement() {
    let mut config = base_config();
    config.environment.relaxed = true;
    config.environment.allowed_organizations = Some(vec![ORG.into()]);
    let h = build(config);

    let mut req = bearer(&mint(subscribed("jti-relaxed", "Gold")));
    req.api.deployment_type = KeyType::Sandbox;
    assert!(h.enforcer.authenticate(&mut req).is_ok());

    let mut req = bearer(&mint(subscribed("jti-relaxed", "Gold")));
    req.api.deployment_type = KeyType::Sandbox;
    req.api.organization_id = "org-other".into();
    assert!(h.enforcer.authenticate(&mut req).is_err());
}

#[test]
fn test_scope_requirements() {
    let h = build(base_config());
    register_bob(&h, SubscriptionState::Unblocked);

    let mut req = bearer(&mint(unsubscribed("jti-scope")));
    req.resource.scopes = vec!["pets:read".into()];
    let ctx = h.enforcer.authenticate(&mut req).unwrap();
    assert!(ctx.scopes_validated);

    let mut req = bearer(&mint(unsubscribed("jti-scope")));
    req.resource.scopes = vec!["pets:read".into(), "pets:admin".into()];
    let err = h.enforcer.authenticate(&mut req).unwrap_err();
    assert!(matches!(err, AuthError::Forbidden { code: 900910, .. }));
    assert!(err.to_string().contains("/pets"));
}

#[test]
fn test_blocked_subscription_reported_first() {
    let mut config = base_config();
    config.issuers[0].allowed_environments = Some(vec!["Production".into()]);
    let h = build(config);
    register_bob(&h, SubscriptionState::Blocked);

    let mut req = bearer(&mint(unsubscribed("jti-order")));
    req.resource.scopes = vec!["pets:admin".into()];
    req.api.deployment_type = KeyType::Sandbox;
    let err = h.enforcer.authenticate(&mut req).unwrap_err();
    assert!(matches!(err, AuthError::Blocked { code: 900907, .. }));
}

#[test]
fn test_environment_reported_before_scope() {
    let h = build(base_config());
    register_bob(&h, SubscriptionState::Unblocked);
    let mut req = bearer(&mint(unsubscribed("jti-env-scope")));
    req.resource.scopes = vec!["pets:admin".into()];
    req.api.deployment_type = KeyType::Sandbox;
    assert!(matches!(
        h.enforcer.authenticate(&mut req).unwrap_err(),
        AuthError::InvalidEnvironment { .. }
    ));
}

#[test]
fn test_unsecured_resource() {
    let h = build(base_config());
    let mut req = get_pets().with_header("x-forwarded-for", "203.0.113.7");
    req.resource.security_disabled = true;
    let ctx = h.enforcer.authenticate(&mut req).unwrap();
    assert_eq!(ctx.authenticator, "unsecured");
    assert_eq!(ctx.username, "anonymous");
    assert_eq!(ctx.token_id, "203.0.113.7");
    assert_eq!(ctx.tier, "Unauthenticated");
    assert_eq!(h.verifier.calls(), 0);
}

#[test]
fn test_missing_credentials() {
    let h = build(base_config());
    let mut req = get_pets();
    let err = h.enforcer.authenticate(&mut req).unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials { .. }));
    assert_eq!(err.code(), 900902);

    let challenge = req.response_headers.get("www-authenticate").unwrap();
    assert!(challenge.contains(r#"Bearer realm="Enforcer""#));
    assert!(challenge.ends_with(
        r#"error="invalid_token", error_description="The provided token is invalid""#
    ));
}

#[test]
fn test_api_key_takes_precedence_over_bearer() {
    let h = build(base_config());
    let key = mint(subscribed("jti-apikey", "Gold"));
    let token = mint(subscribed("jti-bearer", "Gold"));
    let mut req = bearer(&token).with_header("apikey", key);
    let ctx = h.enforcer.authenticate(&mut req).unwrap();
    assert_eq!(ctx.authenticator, "api_key");
    assert_eq!(ctx.token_id, "jti-apikey");
    assert!(!ctx.scopes_validated);
}
