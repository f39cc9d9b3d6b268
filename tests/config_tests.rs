//! Integration tests for configuration loading
//!
//! # Test Coverage
//!
//! - YAML files round-trip into a working engine (system clock, real collaborators)
//! - `ENFORCER_*` overrides
//! - Validation failures for unsafe settings

mod common;

use common::claims::subscribed;
use common::harness::{base_config, bearer};
use common::tokens::mint;
use enforcer::{Enforcer, EnforcerConfig};
use jsonwebtoken::Algorithm;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

fn write_config(config: &EnforcerConfig) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(serde_yaml::to_string(config).unwrap().as_bytes())
        .unwrap();
    file
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[test]
fn test_engine_from_yaml_file() {
    let file = write_config(&base_config());
    let config = EnforcerConfig::load(file.path()).unwrap();
    assert_eq!(config.issuers.len(), 1);
    let enforcer = Enforcer::from_config(config).unwrap();

    let mut claims = subscribed("jti-live", "Gold");
    claims["exp"] = json!(unix_now() + 600);
    let ctx = enforcer.authenticate(&mut bearer(&mint(claims))).unwrap();
    assert_eq!(ctx.tier, "Gold");

    let mut expired = subscribed("jti-dead", "Gold");
    expired["exp"] = json!(unix_now() - 600);
    assert!(enforcer.authenticate(&mut bearer(&mint(expired))).is_err());
}

#[test]
fn test_partial_yaml_uses_defaults() {
    let config = EnforcerConfig::from_yaml(
        "gateway_environment: Production\ncache:\n  ttl_secs: 60\n",
    )
    .unwrap();
    assert_eq!(config.gateway_environment, "Production");
    assert_eq!(config.cache.ttl_secs, 60);
    assert!(config.cache.enabled);
    assert_eq!(config.auth_header, "authorization");
    assert_eq!(config.opaque_key_prefix, "chp_");
}

#[test]
fn test_overrides() {
    let env: HashMap<&str, &str> = [
        ("ENFORCER_API_KEY_HEADER", "X-Api-Key"),
        ("ENFORCER_CACHE_CAPACITY", "42"),
        ("ENFORCER_ENVIRONMENT_RELAXED", "true"),
        ("ENFORCER_CACHE_TTL_SECS", "not-a-number"),
    ]
    .into_iter()
    .collect();
    let mut config = base_config();
    config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
    assert_eq!(config.api_key_header, "x-api-key");
    assert_eq!(config.cache.capacity, 42);
    assert!(config.environment.relaxed);
    assert_eq!(config.cache.ttl_secs, 900);
}

#[test]
fn test_load_errors() {
    assert!(EnforcerConfig::load("/nonexistent/enforcer.yaml").is_err());

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"cache: [not, a, map]").unwrap();
    let err = EnforcerConfig::load(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_validation_rejects_unsafe_settings() {
    let mut config = base_config();
    config.jwt.allowed_algorithms = vec![Algorithm::HS256];
    assert!(EnforcerConfig::load(write_config(&config).path()).is_err());

    let mut config = base_config();
    config.issuers[0].certificate_pem = None;
    assert!(config.validate().is_err());

    let mut config = base_config();
    config.cache.capacity = 0;
    assert!(Enforcer::from_config(config).is_err());
}
