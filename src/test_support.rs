//! Fixture keys, token minting and a mock JWKS endpoint for tests.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::oidc::OidcConfig;

pub use crate::oidc::config::JWKS_PATH;

pub const TEST_ISSUER: &str = "https://idp.example.com";

pub const PRIMARY_KID: &str = "primary";
pub const EC_KID: &str = "ec-p256";

/// Modulus of `testdata/rsa-primary.pem`.
pub const PRIMARY_RSA_N: &str = "rA-pYf5HJlZjzgTJYYLU0GCx5tTgVPPQTvZbOX-8aRYHzYwVjWP0Xl15TEH9NDE0lrtsPVE0uJEAEWSGzeWnM2El3uAbjlyv8crONaveNeGy5g8JR7tppTbX9wfRxCr6YBO19rGjKV5JGPZlCfvg4egxDyyffmSdTV42PZZ2JoX0TTuRu2l3cblzMuLOoXxYkjJ0t6d-h2dYNHxhCjxYcL4z3XQXqCCqY94RMsFtgeXJDijBxNdLX5H2RWpo5cLvjdPFNVb4aQvLX4PC0vKKD3HVIe5TQCqSCjWzpMDAA4xS58DO96AZFrWzoH2r2T9w3y3nnfSs_WN1oLgPcNVbVw";

/// Modulus of `testdata/rsa-rogue.pem`.
pub const ROGUE_RSA_N: &str = "pVFpklW8fF6Qh9KRF7hKaWWFeyzNinJCk2QiRszYdv7F6Q_RwvlNKQY_mMlwhUxRK-qX4YFafkWC4YuUxocaikZ-5dZvGsK9NfvaEG3RIN-1LCy01yRYDHU-Q59oKb61T9Tf1Mt1vxUwmelcUcD4xydZIvYhzXz1dyEKfW0oJIsUp4KP_rKYBDVCEeQMSPCraYCh0yMOd5_SJfgED4d8qkKDcGOskUEOH9mbLvTSEBsRiwA3OsoPbWGYIV15ITrr8Ab04B3hLxZaNWFJnXi6claLF1_Uymjsz-fI5kKx0MkEc7_WI0Ex3MnOqwlobjp2M5gMdI_Yv1rookaijKp61w";

/// Public point of `testdata/ec-p256.pem`.
pub const EC_P256_X: &str = "saWn5rUFDUVg544jocPYCjbHoU_EKqyiLdYq3CKryMk";
pub const EC_P256_Y: &str = "JwnqxmT4J8i5IDJAZ3YNveQweTjSlFjdFrSH4jVEfw8";

const PRIMARY_PEM: &str = include_str!("../testdata/rsa-primary.pem");
const ROGUE_PEM: &str = include_str!("../testdata/rsa-rogue.pem");
const EC_PEM: &str = include_str!("../testdata/ec-p256.pem");

pub fn primary_encoding_key() -> EncodingKey {
    EncodingKey::from_rsa_pem(PRIMARY_PEM.as_bytes()).unwrap()
}

pub fn rogue_encoding_key() -> EncodingKey {
    EncodingKey::from_rsa_pem(ROGUE_PEM.as_bytes()).unwrap()
}

pub fn ec_encoding_key() -> EncodingKey {
    EncodingKey::from_ec_pem(EC_PEM.as_bytes()).unwrap()
}

pub fn rsa_jwk(kid: &str, n: &str) -> Value {
    json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": kid,
        "n": n,
        "e": "AQAB",
    })
}

pub fn ec_jwk(kid: &str) -> Value {
    json!({
        "kty": "EC",
        "use": "sig",
        "alg": "ES256",
        "kid": kid,
        "crv": "P-256",
        "x": EC_P256_X,
        "y": EC_P256_Y,
    })
}

pub fn jwks(keys: Vec<Value>) -> Value {
    json!({ "keys": keys })
}

/// Sign `claims` into a compact token.
pub fn mint(alg: Algorithm, key: &EncodingKey, kid: Option<&str>, claims: &impl Serialize) -> String {
    let mut header = Header::new(alg);
    header.kid = kid.map(String::from);
    encode(&header, claims, key).unwrap()
}

/// Start a mock identity provider serving `body` as its key set.
pub async fn jwks_server(body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

/// Configuration pointing at a mock JWKS endpoint, without refetch cooldown.
pub fn test_config(server: &MockServer) -> OidcConfig {
    OidcConfig {
        issuer: TEST_ISSUER.to_string(),
        jwks_url: Some(format!("{}{}", server.uri(), JWKS_PATH)),
        jwks_fetch_timeout_secs: 2,
        jwks_refetch_cooldown_secs: 0,
        ..Default::default()
    }
}
