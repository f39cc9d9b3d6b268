#![allow(dead_code)]

//! Shared fixtures for the integration tests: keys, token minting, a
//! counting verifier, an engine harness, and `tiny_http` mock services.

pub mod keys {
    pub const ISSUER_PRIVATE_PEM: &str = include_str!("../fixtures/issuer_private.pem");
    pub const ISSUER_PUBLIC_PEM: &str = include_str!("../fixtures/issuer_public.pem");
    pub const BACKEND_PRIVATE_PEM: &str = include_str!("../fixtures/backend_private.pem");
    pub const BACKEND_PUBLIC_PEM: &str = include_str!("../fixtures/backend_public.pem");

    /// Modulus of the issuer key, for JWKS documents.
    pub const ISSUER_JWK_N: &str = "uxXTNuoQmgGVVETh4drB0WitefGV_NtOB7u7Bjyn_2MwAbKMy4nzoXNS0JDru5kDzhRCqP90P5nyaUNCgpy1tJghuDbP51wIgv8tSvwveeVN7EFXxiDFnsBwqJ748tFslpXdGa3d-DUFFhS-Vi8b_oAO22aDt2nysLOez6IMwxRqAWE3EKKo-AVHCNKGGdzo1cR1nWzyFnt4t6sE4H1kdya2_tfDb_tbpJxooVZinbWm8bXzFPHW-bzI0vCkiEJvUTqKc8Fm7_0o2j4VE303dxyD3mgLJHiJ6pbHqDT_VWvU4l1HdqhdwjQp0r3Ar1AIB6MjdWhzfyP2clp22fbOaw";

    pub fn issuer_jwks(kid: &str) -> String {
        serde_json::json!({
            "keys": [{"kty": "RSA", "kid": kid, "alg": "RS256", "n": ISSUER_JWK_N, "e": "AQAB"}]
        })
        .to_string()
    }
}

pub mod tokens {
    use super::keys::ISSUER_PRIVATE_PEM;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::Value;

    pub const ISSUER: &str = "https://idp.example.com/oauth2/token";
    pub const KEY_MANAGER: &str = "Resident Key Manager";
    pub const NOW: i64 = 1_700_000_000;

    pub fn mint(claims: Value) -> String {
        mint_with_header(Header::new(Algorithm::RS256), claims)
    }

    pub fn mint_with_kid(kid: &str, claims: Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        mint_with_header(header, claims)
    }

    pub fn mint_with_header(header: Header, claims: Value) -> String {
        let key = EncodingKey::from_rsa_pem(ISSUER_PRIVATE_PEM.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }
}

pub mod verifier {
    use enforcer::security::jwt::{RsaTokenVerifier, TokenVerifier};
    use enforcer::AuthError;
    use jsonwebtoken::{Algorithm, DecodingKey, Header};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Real RSA verification that counts how often it runs.
    pub struct CountingVerifier {
        inner: RsaTokenVerifier,
        calls: AtomicUsize,
    }

    impl CountingVerifier {
        pub fn new(allowed: Vec<Algorithm>) -> Self {
            Self {
                inner: RsaTokenVerifier::new(allowed),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenVerifier for CountingVerifier {
        fn verify(&self, raw: &str, header: &Header, key: &DecodingKey) -> Result<(), AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(raw, header, key)
        }
    }
}

pub mod harness {
    use super::keys::{BACKEND_PRIVATE_PEM, ISSUER_PUBLIC_PEM};
    use super::tokens::{ISSUER, KEY_MANAGER, NOW};
    use super::verifier::CountingVerifier;
    use enforcer::config::IssuerConfig;
    use enforcer::security::backend::GeneratorRegistry;
    use enforcer::security::exchange::KeyExchange;
    use enforcer::security::revocation::RevokedSet;
    use enforcer::security::subscription::InMemoryPolicyStore;
    use enforcer::security::trust::CompositeTrust;
    use enforcer::{
        ApiDescriptor, Collaborators, Enforcer, EnforcerConfig, ManualClock, RequestContext,
        ResourceDescriptor, SecurityScheme,
    };
    use http::Method;
    use std::sync::Arc;

    pub const API_UUID: &str = "api-petstore";
    pub const ORG: &str = "org-acme";

    pub struct Harness {
        pub clock: Arc<ManualClock>,
        pub store: Arc<InMemoryPolicyStore>,
        pub verifier: Arc<CountingVerifier>,
        pub revoked: RevokedSet,
        pub enforcer: Enforcer,
    }

    pub fn issuer_config() -> IssuerConfig {
        IssuerConfig {
            name: KEY_MANAGER.to_string(),
            issuer: ISSUER.to_string(),
            certificate_pem: Some(ISSUER_PUBLIC_PEM.to_string()),
            ..IssuerConfig::default()
        }
    }

    pub fn base_config() -> EnforcerConfig {
        EnforcerConfig {
            issuers: vec![issuer_config()],
            ..EnforcerConfig::default()
        }
    }

    pub fn backend_enabled(config: &mut EnforcerConfig) {
        config.backend_jwt.enabled = true;
        config.backend_jwt.private_key_pem = Some(BACKEND_PRIVATE_PEM.to_string());
    }

    /// Engine over `config` with in-memory collaborators and a manual clock at [`NOW`].
    pub fn build(config: EnforcerConfig) -> Harness {
        build_with_exchange(config, None)
    }

    pub fn build_with_exchange(
        config: EnforcerConfig,
        key_exchange: Option<Arc<dyn KeyExchange>>,
    ) -> Harness {
        try_build(config, key_exchange, GeneratorRegistry::with_defaults()).unwrap()
    }

    pub fn try_build(
        config: EnforcerConfig,
        key_exchange: Option<Arc<dyn KeyExchange>>,
        generators: GeneratorRegistry,
    ) -> anyhow::Result<Harness> {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(InMemoryPolicyStore::new());
        let verifier = Arc::new(CountingVerifier::new(config.jwt.allowed_algorithms.clone()));
        let revoked = RevokedSet::new();
        let collaborators = Collaborators {
            clock: clock.clone(),
            policy_store: store.clone(),
            trust: Arc::new(CompositeTrust::from_configs(&config.issuers)?),
            verifier: verifier.clone(),
            key_exchange,
            revoked: revoked.clone(),
            generators,
        };
        let enforcer = Enforcer::with_collaborators(config, collaborators)?;
        Ok(Harness {
            clock,
            store,
            verifier,
            revoked,
            enforcer,
        })
    }

    pub fn petstore_api() -> ApiDescriptor {
        ApiDescriptor {
            uuid: API_UUID.to_string(),
            organization_id: ORG.to_string(),
            security: vec![SecurityScheme::OAuth2, SecurityScheme::ApiKey],
            ..ApiDescriptor::new("PetStore", "1.0.0", "/petstore")
        }
    }

    pub fn get_pets() -> RequestContext {
        RequestContext::new(petstore_api(), ResourceDescriptor::new(Method::GET, "/pets"))
    }

    pub fn bearer(raw: &str) -> RequestContext {
        get_pets().with_header("authorization", format!("Bearer {raw}"))
    }
}

pub mod claims {
    use super::tokens::{ISSUER, NOW};
    use serde_json::{json, Value};

    /// Claims subscribed to PetStore 1.0.0 on `tier`.
    pub fn subscribed(jti: &str, tier: &str) -> Value {
        json!({
            "iss": ISSUER,
            "sub": "alice@acme",
            "jti": jti,
            "exp": NOW + 3600,
            "keytype": "PRODUCTION",
            "consumerKey": "ck-alice",
            "application": {"id": "7", "uuid": "app-uuid-1", "name": "PetShop", "owner": "alice", "tier": "Unlimited"},
            "subscribedAPIs": [{
                "name": "PetStore",
                "context": "/petstore/1.0.0",
                "version": "1.0.0",
                "publisher": "admin",
                "subscriptionTier": tier,
                "subscriberTenantDomain": "acme.com"
            }],
            "tierInfo": {
                "Gold": {"tierQuotaType": "requestCount", "stopOnQuotaReach": false, "spikeArrestLimit": 10, "spikeArrestUnit": "sec"},
                "Bandwidth": {"tierQuotaType": "bandwidthVolume", "stopOnQuotaReach": true}
            }
        })
    }

    /// Claims without a subscription list (remote path).
    pub fn unsubscribed(jti: &str) -> Value {
        json!({
            "iss": ISSUER,
            "sub": "bob@acme",
            "jti": jti,
            "exp": NOW + 3600,
            "consumerKey": "ck-bob",
            "scope": "pets:read pets:write"
        })
    }
}

pub mod mock_server {
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tiny_http::{Header, Response, Server};

    /// A `tiny_http` server answering every request with `handler(method, url, body)`.
    pub struct MockServer {
        server: Arc<Server>,
        pub base_url: String,
        hits: Arc<AtomicUsize>,
    }

    impl MockServer {
        pub fn start<F>(handler: F) -> Self
        where
            F: Fn(&str, &str, &str) -> (u16, String) + Send + 'static,
        {
            let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
            let addr = server.server_addr().to_ip().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let worker = Arc::clone(&server);
            let counter = Arc::clone(&hits);
            thread::spawn(move || {
                for mut request in worker.incoming_requests() {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let mut body = String::new();
                    let _ = request.as_reader().read_to_string(&mut body);
                    let (status, payload) =
                        handler(request.method().as_str(), request.url(), &body);
                    let content_type =
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                    let response = Response::from_string(payload)
                        .with_status_code(status)
                        .with_header(content_type);
                    let _ = request.respond(response);
                }
            });
            Self {
                server,
                base_url: format!("http://127.0.0.1:{}", addr.port()),
                hits,
            }
        }

        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    impl Drop for MockServer {
        fn drop(&mut self) {
            self.server.unblock();
        }
    }
}
