//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! The current key set is held behind an `Arc` and replaced wholesale on every
//! successful fetch. Readers clone the `Arc` and never wait on network I/O.
//! Fetches are serialized through an async mutex so that at most one request to
//! the identity provider is in flight; callers that queued behind a fetch take
//! its outcome instead of issuing their own.

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::OidcConfig;
use super::error::{AuthError, JwksError};

/// Algorithms the verifier accepts. Symmetric and `none` algorithms are absent
/// because a published key set can only carry public keys.
pub const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Map a header `alg` value onto a supported algorithm.
pub fn supported_algorithm(name: &str) -> Option<Algorithm> {
    Algorithm::from_str(name)
        .ok()
        .filter(|alg| SUPPORTED_ALGORITHMS.contains(alg))
}

/// Key type and curve of a published key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
    Ed25519,
}

impl KeyFamily {
    /// Whether a key of this family can verify signatures made with `alg`.
    pub fn supports(self, alg: Algorithm) -> bool {
        matches!(
            (self, alg),
            (
                KeyFamily::Rsa,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ) | (KeyFamily::EcP256, Algorithm::ES256)
                | (KeyFamily::EcP384, Algorithm::ES384)
                | (KeyFamily::Ed25519, Algorithm::EdDSA)
        )
    }
}

/// A verification key resolved from the key set.
pub struct Key {
    pub kid: String,
    /// Algorithm pinned by the JWK `alg` member, if any.
    pub alg: Option<Algorithm>,
    pub family: KeyFamily,
    pub decoding_key: DecodingKey,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl Key {
    /// Build a key from a JWK entry.
    fn from_jwk(kid: String, jwk: &Jwk) -> Result<Self> {
        let (family, decoding_key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_ref().ok_or_else(|| anyhow!("RSA key missing 'n'"))?;
                let e = jwk.e.as_ref().ok_or_else(|| anyhow!("RSA key missing 'e'"))?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .context("Failed to create RSA DecodingKey")?;
                (KeyFamily::Rsa, key)
            }
            "EC" => {
                let crv = jwk.crv.as_deref().ok_or_else(|| anyhow!("EC key missing 'crv'"))?;
                let family = match crv {
                    "P-256" => KeyFamily::EcP256,
                    "P-384" => KeyFamily::EcP384,
                    _ => return Err(anyhow!("Unsupported EC curve: {}", crv)),
                };
                let x = jwk.x.as_ref().ok_or_else(|| anyhow!("EC key missing 'x'"))?;
                let y = jwk.y.as_ref().ok_or_else(|| anyhow!("EC key missing 'y'"))?;
                let key = DecodingKey::from_ec_components(x, y)
                    .context("Failed to create EC DecodingKey")?;
                (family, key)
            }
            "OKP" => {
                let crv = jwk.crv.as_deref().ok_or_else(|| anyhow!("OKP key missing 'crv'"))?;
                if crv != "Ed25519" {
                    return Err(anyhow!("Unsupported OKP curve: {}", crv));
                }
                let x = jwk.x.as_ref().ok_or_else(|| anyhow!("OKP key missing 'x'"))?;
                let key = DecodingKey::from_ed_components(x)
                    .context("Failed to create Ed25519 DecodingKey")?;
                (KeyFamily::Ed25519, key)
            }
            kty => return Err(anyhow!("Unsupported key type: {}", kty)),
        };

        let alg = match jwk.alg.as_deref() {
            Some(name) => {
                let alg = supported_algorithm(name)
                    .ok_or_else(|| anyhow!("Unsupported key algorithm: {}", name))?;
                if !family.supports(alg) {
                    return Err(anyhow!("Algorithm {} does not match key type {}", name, jwk.kty));
                }
                Some(alg)
            }
            None => None,
        };

        Ok(Self {
            kid,
            alg,
            family,
            decoding_key,
        })
    }
}

/// JWKS document as served by the identity provider.
///
/// Entries stay untyped so that one odd key does not reject the whole set.
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Individual JSON Web Key.
#[derive(Debug, Deserialize)]
struct Jwk {
    /// Key type (RSA, EC, OKP)
    kty: String,
    kid: Option<String>,
    alg: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use")]
    key_use: Option<String>,

    // RSA parameters
    n: Option<String>,
    e: Option<String>,

    // EC / OKP parameters
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

/// An immutable set of verification keys indexed by key ID.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: Vec<Arc<Key>>,
    index: HashMap<String, usize>,
}

impl KeySet {
    /// Parse a JWKS document.
    ///
    /// Encryption keys, keys without a `kid` and keys that cannot be decoded are
    /// skipped. A repeated `kid` keeps its first occurrence.
    pub fn from_slice(body: &[u8]) -> Result<Self, JwksError> {
        let document: JwksDocument =
            serde_json::from_slice(body).map_err(|e| JwksError::Parse(e.to_string()))?;

        let mut set = KeySet::default();
        for raw in document.keys {
            let jwk: Jwk = match serde_json::from_value(raw) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!(error = %e, "Malformed JWK, skipping");
                    continue;
                }
            };

            if jwk.key_use.as_deref() == Some("enc") {
                debug!(kid = ?jwk.kid, "Skipping encryption key");
                continue;
            }

            let Some(kid) = jwk.kid.clone() else {
                warn!(kty = %jwk.kty, "JWK has no kid, skipping");
                continue;
            };

            if set.contains(&kid) {
                warn!(kid = %kid, "Duplicate kid in JWKS, keeping first entry");
                continue;
            }

            match Key::from_jwk(kid.clone(), &jwk) {
                Ok(key) => {
                    debug!(kid = %kid, kty = %jwk.kty, "Loaded JWK");
                    set.index.insert(kid, set.keys.len());
                    set.keys.push(Arc::new(key));
                }
                Err(e) => {
                    warn!(
                        kid = %kid,
                        kty = %jwk.kty,
                        error = %e,
                        "Failed to parse JWK, skipping"
                    );
                }
            }
        }

        if set.is_empty() {
            return Err(JwksError::NoUsableKeys);
        }

        Ok(set)
    }

    pub fn get(&self, kid: &str) -> Option<Arc<Key>> {
        self.index.get(kid).map(|&i| Arc::clone(&self.keys[i]))
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.index.contains_key(kid)
    }

    /// Key IDs in document order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.kid.as_str())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Upper bound on the size of a JWKS response body.
const MAX_JWKS_BYTES: usize = 1024 * 1024;

struct RefreshState {
    /// Start of the last refetch caused by an unknown key ID. Periodic and
    /// explicit refreshes leave it untouched.
    last_miss_refetch: Option<Instant>,
    last_outcome: Result<(), JwksError>,
}

/// JWKS cache with coalesced refresh.
pub struct JwksCache {
    /// Current key set, swapped as a whole.
    current: RwLock<Arc<KeySet>>,
    /// Held for the duration of a fetch.
    refresh_state: Mutex<RefreshState>,
    /// Number of finished fetch attempts, successful or not.
    completed_refreshes: AtomicU64,
    /// Minimum gap between refetches triggered by unknown key IDs.
    refetch_cooldown: Duration,
    /// JWKS endpoint URL
    jwks_url: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl JwksCache {
    /// Create the cache and perform the initial fetch.
    ///
    /// Fails if the first key set cannot be obtained, since no token can be
    /// verified without it.
    pub async fn new(config: &OidcConfig) -> Result<Self> {
        let timeout = config.fetch_timeout();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .context("Failed to create HTTP client")?;

        let jwks_url = config.jwks_url();
        let initial = fetch_key_set(&http_client, &jwks_url)
            .await
            .with_context(|| format!("Failed to fetch initial JWKS from {}", jwks_url))?;

        info!(
            url = %jwks_url,
            key_count = initial.len(),
            kids = ?initial.kids().collect::<Vec<_>>(),
            "JWKS cache initialized"
        );

        Ok(Self {
            current: RwLock::new(Arc::new(initial)),
            refresh_state: Mutex::new(RefreshState {
                last_miss_refetch: None,
                last_outcome: Ok(()),
            }),
            completed_refreshes: AtomicU64::new(0),
            refetch_cooldown: config.refetch_cooldown(),
            jwks_url,
            http_client,
        })
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// The key set currently in use.
    pub fn snapshot(&self) -> Arc<KeySet> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Resolve a key by ID.
    ///
    /// On a miss the key set is refetched (or an in-flight fetch is joined) and
    /// the lookup is retried once.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<Key>, AuthError> {
        if let Some(key) = self.snapshot().get(kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cache, refetching JWKS");
        match self.refresh_coalesced(true).await {
            Ok(()) => {}
            Err(e @ JwksError::Cooldown { .. }) => {
                debug!(kid = %kid, reason = %e, "Skipped JWKS refetch");
            }
            Err(e) => {
                warn!(kid = %kid, error = %e, "JWKS refetch for unknown key failed");
            }
        }

        self.snapshot()
            .get(kid)
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }

    /// Fetch the key set and swap it in.
    ///
    /// On failure the previous key set stays in place.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        self.refresh_coalesced(false).await
    }

    async fn refresh_coalesced(&self, respect_cooldown: bool) -> Result<(), JwksError> {
        let observed = self.completed_refreshes.load(Ordering::Acquire);
        let mut state = self.refresh_state.lock().await;

        // Another caller finished a fetch while we waited for the lock.
        if self.completed_refreshes.load(Ordering::Acquire) != observed {
            debug!("Joined in-flight JWKS refresh");
            return state.last_outcome.clone();
        }

        if respect_cooldown {
            if let Some(last) = state.last_miss_refetch {
                let elapsed = last.elapsed();
                if elapsed < self.refetch_cooldown {
                    return Err(JwksError::Cooldown {
                        elapsed_ms: elapsed.as_millis(),
                    });
                }
            }
            state.last_miss_refetch = Some(Instant::now());
        }

        let outcome = match fetch_key_set(&self.http_client, &self.jwks_url).await {
            Ok(set) => {
                let key_count = set.len();
                self.swap(set);
                info!(url = %self.jwks_url, key_count, "JWKS cache refreshed");
                Ok(())
            }
            Err(e) => Err(e),
        };

        state.last_outcome = outcome.clone();
        self.completed_refreshes.fetch_add(1, Ordering::AcqRel);

        outcome
    }

    fn swap(&self, set: KeySet) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(set);
    }
}

async fn fetch_key_set(client: &reqwest::Client, url: &str) -> Result<KeySet, JwksError> {
    debug!(url = %url, "Fetching JWKS");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| request_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(JwksError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = read_capped_body(response, url).await?;
    KeySet::from_slice(&body)
}

async fn read_capped_body(
    mut response: reqwest::Response,
    url: &str,
) -> Result<Vec<u8>, JwksError> {
    let too_large = || JwksError::TooLarge {
        url: url.to_string(),
        limit: MAX_JWKS_BYTES,
    };

    if response
        .content_length()
        .is_some_and(|len| len > MAX_JWKS_BYTES as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, e))? {
        if body.len() + chunk.len() > MAX_JWKS_BYTES {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn request_error(url: &str, error: reqwest::Error) -> JwksError {
    if error.is_timeout() {
        JwksError::Timeout {
            url: url.to_string(),
        }
    } else {
        JwksError::Fetch {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
