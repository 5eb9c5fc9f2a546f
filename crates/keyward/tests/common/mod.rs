//! Common test utilities for integration tests
//!
//! A wiremock-backed authorization server (JWKS + introspection) and an RSA
//! signing key generated once per test binary.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use keyward::TokenResolver;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{basic_auth, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ISSUER: &str = "X";
pub const AUDIENCE: &str = "Y";
pub const KID: &str = "test-key-1";
pub const CLIENT_ID: &str = "erp-api";
pub const CLIENT_SECRET: &str = "erp-secret";

/// RSA key material shared by every test in the binary
pub struct TestKey {
    pub private_pem: Vec<u8>,
    pub public_pem: Vec<u8>,
    pub n: String,
    pub e: String,
}

pub fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(generate_test_rsa_key)
}

fn generate_test_rsa_key() -> TestKey {
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::traits::PublicKeyParts;

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
    let public_key = private_key.to_public_key();

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("Failed to encode private key")
        .as_bytes()
        .to_vec();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .expect("Failed to encode public key")
        .as_bytes()
        .to_vec();

    TestKey {
        private_pem,
        public_pem,
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    }
}

/// Public JWK for the shared test key under `kid`
pub fn test_jwk(kid: &str) -> Value {
    let key = test_key();
    json!({
        "kty": "RSA",
        "kid": kid,
        "alg": "RS256",
        "use": "sig",
        "n": key.n,
        "e": key.e,
    })
}

/// Sign `claims` with the shared RSA key, putting `kid` in the header
pub fn mint_jwt(claims: &Value, kid: Option<&str>) -> String {
    let key = EncodingKey::from_rsa_pem(&test_key().private_pem).expect("Invalid RSA key");
    let mut header = Header::new(Algorithm::RS256);
    header.typ = Some("JWT".to_string());
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(&header, claims, &key).expect("Failed to encode test JWT")
}

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Claims accepted by the default resolver, expiring `exp_offset_secs` from now
pub fn test_claims(sub: &str, exp_offset_secs: i64) -> Value {
    let now = current_timestamp();
    json!({
        "sub": sub,
        "iss": ISSUER,
        "aud": AUDIENCE,
        "exp": now + exp_offset_secs,
        "iat": now,
    })
}

/// Mock authorization server with JWKS and introspection endpoints
pub struct MockAuthServer {
    pub server: MockServer,
    pub jwks_endpoint: String,
    pub introspection_endpoint: String,
}

impl MockAuthServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            jwks_endpoint: format!("{base_url}/jwks"),
            introspection_endpoint: format!("{base_url}/introspect"),
            server,
        }
    }

    /// Serve the shared key under [`KID`], expecting exactly `times` fetches
    pub async fn mock_jwks(&self, times: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [test_jwk(KID)]
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Answer introspection of `token` with `body`, expecting exactly `times` calls
    pub async fn mock_introspection(&self, token: &str, body: Value, times: u64) {
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .and(basic_auth(CLIENT_ID, CLIENT_SECRET))
            .and(body_string_contains(format!("token={token}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Make the introspection endpoint fail with `status`
    pub async fn mock_introspection_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Resolver with both strategies pointed at this server
    pub fn resolver(&self) -> TokenResolver {
        TokenResolver::builder()
            .jwks_url(self.jwks_endpoint.clone())
            .introspection(
                self.introspection_endpoint.clone(),
                CLIENT_ID,
                SecretString::new(CLIENT_SECRET.to_string()),
            )
            .issuer(ISSUER)
            .audience(AUDIENCE)
            .build()
            .expect("valid resolver configuration")
    }

    /// Resolver that only knows the JWKS endpoint
    pub fn jwks_only_resolver(&self) -> TokenResolver {
        TokenResolver::builder()
            .jwks_url(self.jwks_endpoint.clone())
            .issuer(ISSUER)
            .audience(AUDIENCE)
            .build()
            .expect("valid resolver configuration")
    }
}
