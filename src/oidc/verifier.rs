//! Bearer token verification.
//!
//! Verification runs as a fixed sequence of checks and stops at the first
//! failure: header presence, scheme, structure, key resolution, signature,
//! time claims, issuer, audience.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::crypto;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::config::OidcConfig;
use super::error::AuthError;
use super::jwks::{supported_algorithm, JwksCache};

/// Decoded token payload.
pub type Claims = Map<String, Value>;

/// Outcome of verifying one request.
pub type AuthDecision = Result<Claims, AuthError>;

const BEARER_PREFIX: &str = "Bearer ";

/// Source of the current time as seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Audience can be a single string or array of strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Read the `aud` claim. A missing or malformed claim has no audience.
    fn from_claims(claims: &Claims) -> Self {
        claims
            .get("aud")
            .and_then(|aud| serde_json::from_value(aud.clone()).ok())
            .unwrap_or_default()
    }

    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s == aud,
            Audience::Multiple(v) => v.iter().any(|a| a == aud),
        }
    }
}

/// Protected header fields the verifier needs.
#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    kid: Option<String>,
}

/// A token split into its segments, with header and payload decoded.
struct ParsedToken<'a> {
    header: TokenHeader,
    kid: String,
    signing_input: &'a str,
    signature: &'a str,
    payload: Vec<u8>,
}

/// Verifies bearer tokens against the cached key set.
pub struct TokenVerifier {
    jwks: Arc<JwksCache>,
    issuer: String,
    audience: Option<String>,
    enforce_audience: bool,
    leeway_secs: u64,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(config: &OidcConfig, jwks: Arc<JwksCache>) -> Self {
        Self {
            jwks,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            enforce_audience: config.enforce_audience,
            leeway_secs: config.clock_skew_secs,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verify the raw value of an `Authorization` header.
    pub async fn verify_header(&self, authorization: Option<&str>) -> AuthDecision {
        let value = match authorization {
            Some(v) if !v.is_empty() => v,
            _ => return Err(AuthError::MissingHeader),
        };

        let token = value
            .strip_prefix(BEARER_PREFIX)
            .ok_or(AuthError::MalformedScheme)?;

        self.verify_token(token).await
    }

    /// Verify a compact JWS token.
    pub async fn verify_token(&self, token: &str) -> AuthDecision {
        let parsed = parse_token(token)?;

        debug!(
            kid = %parsed.kid,
            alg = %parsed.header.alg,
            "Verifying bearer token"
        );

        let key = self.jwks.resolve(&parsed.kid).await?;

        let alg = supported_algorithm(&parsed.header.alg)
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(parsed.header.alg.clone()))?;

        if key.alg.is_some_and(|pinned| pinned != alg) || !key.family.supports(alg) {
            return Err(AuthError::InvalidSignature);
        }

        let valid = crypto::verify(
            parsed.signature,
            parsed.signing_input.as_bytes(),
            &key.decoding_key,
            alg,
        )
        .unwrap_or(false);
        if !valid {
            return Err(AuthError::InvalidSignature);
        }

        let claims = match serde_json::from_slice::<Value>(&parsed.payload) {
            Ok(Value::Object(claims)) => claims,
            _ => return Err(AuthError::ClaimExtractionFailure),
        };

        self.check_time(&claims)?;
        self.check_issuer(&claims)?;
        self.check_audience(&claims)?;

        debug!(
            kid = %parsed.kid,
            sub = ?claims.get("sub").and_then(|v| v.as_str()),
            "Bearer token verified"
        );

        Ok(claims)
    }

    fn check_time(&self, claims: &Claims) -> Result<(), AuthError> {
        let now = self.clock.now() as f64;
        let leeway = self.leeway_secs as f64;

        if let Some(exp) = numeric_claim(claims, "exp")? {
            if now >= exp + leeway {
                return Err(AuthError::TokenExpired);
            }
        }

        if let Some(nbf) = numeric_claim(claims, "nbf")? {
            if now + leeway < nbf {
                return Err(AuthError::TokenNotYetValid);
            }
        }

        Ok(())
    }

    fn check_issuer(&self, claims: &Claims) -> Result<(), AuthError> {
        match claims.get("iss").and_then(Value::as_str) {
            Some(iss) if iss == self.issuer => Ok(()),
            _ => Err(AuthError::InvalidIssuer),
        }
    }

    fn check_audience(&self, claims: &Claims) -> Result<(), AuthError> {
        if !self.enforce_audience {
            return Ok(());
        }
        let Some(ref expected) = self.audience else {
            return Err(AuthError::InvalidAudience);
        };

        if Audience::from_claims(claims).contains(expected) {
            Ok(())
        } else {
            Err(AuthError::InvalidAudience)
        }
    }
}

fn parse_token(token: &str) -> Result<ParsedToken<'_>, AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::MalformedToken("expected three segments"));
    };

    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(AuthError::MalformedToken("empty segment"));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthError::MalformedToken("header is not base64url"))?;
    let decoded_header: TokenHeader = serde_json::from_slice(&header_bytes)
        .map_err(|_| AuthError::MalformedToken("header is not a JSON object"))?;
    let kid = decoded_header
        .kid
        .clone()
        .ok_or(AuthError::MalformedToken("header has no kid"))?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::MalformedToken("payload is not base64url"))?;

    Ok(ParsedToken {
        header: decoded_header,
        kid,
        signing_input: &token[..header.len() + 1 + payload.len()],
        signature,
        payload: payload_bytes,
    })
}

fn numeric_claim(claims: &Claims, name: &'static str) -> Result<Option<f64>, AuthError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or(AuthError::MalformedToken("time claim is not numeric")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use jsonwebtoken::Algorithm;
    use serde_json::json;

    const ISSUER: &str = TEST_ISSUER;
    const NOW: i64 = 1_750_000_000;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now(&self) -> i64 {
            self.0
        }
    }

    async fn verifier_with(config: OidcConfig) -> TokenVerifier {
        let jwks = JwksCache::new(&config).await.unwrap();
        TokenVerifier::new(&config, Arc::new(jwks)).with_clock(Arc::new(FixedClock(NOW)))
    }

    async fn setup() -> (wiremock::MockServer, TokenVerifier) {
        let server = jwks_server(jwks(vec![
            rsa_jwk(PRIMARY_KID, PRIMARY_RSA_N),
            ec_jwk(EC_KID),
        ]))
        .await;
        let verifier = verifier_with(test_config(&server)).await;
        (server, verifier)
    }

    fn valid_claims() -> Value {
        json!({
            "iss": ISSUER,
            "sub": "user-42",
            "aud": ["330412688444300258", "other"],
            "exp": NOW + 600,
            "iat": NOW - 10,
            "email": "user@example.com",
        })
    }

    fn primary_token(claims: &Value) -> String {
        mint(Algorithm::RS256, &primary_encoding_key(), Some(PRIMARY_KID), claims)
    }

    #[tokio::test]
    async fn test_valid_token_returns_claims_unchanged() {
        let (_server, verifier) = setup().await;
        let claims = valid_claims();

        let decoded = verifier
            .verify_header(Some(&format!("Bearer {}", primary_token(&claims))))
            .await
            .unwrap();

        assert_eq!(Value::Object(decoded), claims);
    }

    #[tokio::test]
    async fn test_ec_token() {
        let (_server, verifier) = setup().await;
        let token = mint(Algorithm::ES256, &ec_encoding_key(), Some(EC_KID), &valid_claims());

        assert!(verifier.verify_token(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_header() {
        let (_server, verifier) = setup().await;
        assert_eq!(
            verifier.verify_header(None).await.unwrap_err(),
            AuthError::MissingHeader
        );
        assert_eq!(
            verifier.verify_header(Some("")).await.unwrap_err(),
            AuthError::MissingHeader
        );
    }

    #[tokio::test]
    async fn test_wrong_scheme() {
        let (_server, verifier) = setup().await;
        for header in ["Token abc", "bearer abc", "Bearer", "Basic dXNlcjpwYXNz"] {
            assert_eq!(
                verifier.verify_header(Some(header)).await.unwrap_err(),
                AuthError::MalformedScheme,
                "header {:?}",
                header
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_tokens() {
        let (_server, verifier) = setup().await;
        let good = primary_token(&valid_claims());
        let (header, rest) = good.split_once('.').unwrap();
        let no_kid = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);

        let cases = [
            "".to_string(),
            "abc".to_string(),
            "a.b".to_string(),
            format!("{}.extra", good),
            format!("{}..sig", header),
            format!("!!!.{}", rest),
            format!("{}.{}", URL_SAFE_NO_PAD.encode("[1,2]"), rest),
            format!("{}.{}", no_kid, rest),
        ];

        for token in cases {
            assert!(
                matches!(
                    verifier.verify_token(&token).await,
                    Err(AuthError::MalformedToken(_))
                ),
                "token {:?}",
                token
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let (_server, verifier) = setup().await;
        let token = mint(Algorithm::RS256, &primary_encoding_key(), Some("zz"), &valid_claims());

        assert_eq!(
            verifier.verify_token(&token).await.unwrap_err(),
            AuthError::UnknownKey("zz".to_string())
        );
    }

    #[tokio::test]
    async fn test_signature_from_other_key_is_rejected() {
        let (_server, verifier) = setup().await;
        // Signed by a key that is not published, under a published kid.
        let token = mint(Algorithm::RS256, &rogue_encoding_key(), Some(PRIMARY_KID), &valid_claims());

        assert_eq!(
            verifier.verify_token(&token).await.unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[tokio::test]
    async fn test_tampered_payload_is_rejected_regardless_of_claims() {
        let (_server, verifier) = setup().await;
        let token = primary_token(&valid_claims());
        let parts: Vec<&str> = token.split('.').collect();

        let tampered_claims = [
            json!({"iss": ISSUER, "exp": NOW + 600, "sub": "admin"}),
            json!({"iss": "https://other.example.com", "exp": NOW - 600}),
            json!({}),
        ];
        for claims in tampered_claims {
            let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
            let forged = format!("{}.{}.{}", parts[0], payload, parts[2]);
            assert_eq!(
                verifier.verify_token(&forged).await.unwrap_err(),
                AuthError::InvalidSignature
            );
        }
    }

    #[tokio::test]
    async fn test_unsupported_algorithms() {
        let (_server, verifier) = setup().await;
        let claims = URL_SAFE_NO_PAD.encode(valid_claims().to_string());

        for alg in ["none", "HS256", "XYZ"] {
            let header = URL_SAFE_NO_PAD.encode(
                json!({"alg": alg, "kid": PRIMARY_KID}).to_string(),
            );
            let token = format!("{}.{}.c2ln", header, claims);
            assert_eq!(
                verifier.verify_token(&token).await.unwrap_err(),
                AuthError::UnsupportedAlgorithm(alg.to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_algorithm_not_matching_key() {
        let (_server, verifier) = setup().await;
        // RS384 is a supported algorithm but the key pins RS256.
        let token = mint(Algorithm::RS384, &primary_encoding_key(), Some(PRIMARY_KID), &valid_claims());
        assert_eq!(
            verifier.verify_token(&token).await.unwrap_err(),
            AuthError::InvalidSignature
        );

        // An RSA signature presented under the EC key.
        let token = mint(Algorithm::RS256, &primary_encoding_key(), Some(EC_KID), &valid_claims());
        assert_eq!(
            verifier.verify_token(&token).await.unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (_server, verifier) = setup().await;

        for exp in [NOW - 3600, NOW - 1, NOW] {
            let mut claims = valid_claims();
            claims["exp"] = json!(exp);
            assert_eq!(
                verifier.verify_token(&primary_token(&claims)).await.unwrap_err(),
                AuthError::TokenExpired,
                "exp {}",
                exp
            );
        }

        let mut claims = valid_claims();
        claims["exp"] = json!(NOW + 1);
        assert!(verifier.verify_token(&primary_token(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_clock_skew_leeway() {
        let server = jwks_server(jwks(vec![rsa_jwk(PRIMARY_KID, PRIMARY_RSA_N)])).await;
        let mut config = test_config(&server);
        config.clock_skew_secs = 30;
        let verifier = verifier_with(config).await;

        let mut claims = valid_claims();
        claims["exp"] = json!(NOW - 10);
        assert!(verifier.verify_token(&primary_token(&claims)).await.is_ok());

        claims["exp"] = json!(NOW - 30);
        assert_eq!(
            verifier.verify_token(&primary_token(&claims)).await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn test_not_before() {
        let (_server, verifier) = setup().await;

        let mut claims = valid_claims();
        claims["nbf"] = json!(NOW + 60);
        assert_eq!(
            verifier.verify_token(&primary_token(&claims)).await.unwrap_err(),
            AuthError::TokenNotYetValid
        );

        claims["nbf"] = json!(NOW);
        assert!(verifier.verify_token(&primary_token(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_exp_is_accepted() {
        let (_server, verifier) = setup().await;
        let claims = json!({"iss": ISSUER, "sub": "user-42"});

        assert!(verifier.verify_token(&primary_token(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_numeric_exp() {
        let (_server, verifier) = setup().await;
        let mut claims = valid_claims();
        claims["exp"] = json!("tomorrow");

        assert!(matches!(
            verifier.verify_token(&primary_token(&claims)).await,
            Err(AuthError::MalformedToken(_))
        ));
    }

    #[tokio::test]
    async fn test_issuer_mismatch() {
        let (_server, verifier) = setup().await;

        for iss in [
            json!("https://other.example.com"),
            json!("https://idp.example.com/"),
            json!(null),
            json!(42),
        ] {
            let mut claims = valid_claims();
            claims["iss"] = iss.clone();
            assert_eq!(
                verifier.verify_token(&primary_token(&claims)).await.unwrap_err(),
                AuthError::InvalidIssuer,
                "iss {}",
                iss
            );
        }

        let mut claims = valid_claims();
        claims.as_object_mut().unwrap().remove("iss");
        assert_eq!(
            verifier.verify_token(&primary_token(&claims)).await.unwrap_err(),
            AuthError::InvalidIssuer
        );
    }

    #[tokio::test]
    async fn test_expiry_checked_before_issuer() {
        let (_server, verifier) = setup().await;
        let claims = json!({"iss": "https://other.example.com", "exp": NOW - 1});

        assert_eq!(
            verifier.verify_token(&primary_token(&claims)).await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn test_audience_ignored_by_default() {
        let (_server, verifier) = setup().await;
        let mut claims = valid_claims();
        claims["aud"] = json!("someone-else");

        assert!(verifier.verify_token(&primary_token(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_audience_enforced() {
        let server = jwks_server(jwks(vec![rsa_jwk(PRIMARY_KID, PRIMARY_RSA_N)])).await;
        let mut config = test_config(&server);
        config.audience = Some("330412688444300258".to_string());
        config.enforce_audience = true;
        let verifier = verifier_with(config).await;

        let accepted = [json!("330412688444300258"), json!(["x", "330412688444300258"])];
        for aud in accepted {
            let mut claims = valid_claims();
            claims["aud"] = aud;
            assert!(verifier.verify_token(&primary_token(&claims)).await.is_ok());
        }

        let rejected = [json!("someone-else"), json!(["x", "y"]), json!(null)];
        for aud in rejected {
            let mut claims = valid_claims();
            claims["aud"] = aud;
            assert_eq!(
                verifier.verify_token(&primary_token(&claims)).await.unwrap_err(),
                AuthError::InvalidAudience
            );
        }
    }

    #[test]
    fn test_audience_claim_shapes() {
        let claims = |aud: Value| json!({ "aud": aud }).as_object().unwrap().clone();

        assert!(Audience::from_claims(&claims(json!("api"))).contains("api"));
        assert!(Audience::from_claims(&claims(json!(["x", "api"]))).contains("api"));
        assert!(!Audience::from_claims(&claims(json!(["x", 1]))).contains("x"));
        assert!(!Audience::from_claims(&claims(json!(42))).contains("42"));
        assert!(!Audience::from_claims(&Claims::new()).contains("api"));
    }

    #[tokio::test]
    async fn test_claims_logged_without_subject() {
        let (_server, verifier) = setup().await;
        let claims = json!({ "iss": ISSUER, "sub": 42 });

        let decoded = verifier.verify_token(&primary_token(&claims)).await.unwrap();
        assert_eq!(decoded.get("sub"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_non_object_payload() {
        let (_server, verifier) = setup().await;
        let token = mint(Algorithm::RS256, &primary_encoding_key(), Some(PRIMARY_KID), &json!([1, 2, 3]));

        assert_eq!(
            verifier.verify_token(&token).await.unwrap_err(),
            AuthError::ClaimExtractionFailure
        );
    }
}
