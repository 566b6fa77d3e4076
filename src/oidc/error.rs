//! Token verification and JWKS errors.

use thiserror::Error;

/// Why a request was refused by the token verifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authorization header is missing")]
    MissingHeader,

    #[error("Invalid token format")]
    MalformedScheme,

    #[error("Malformed token: {0}")]
    MalformedToken(&'static str),

    #[error("Unknown signing key '{0}'")]
    UnknownKey(String),

    #[error("Unsupported token algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token is not yet valid")]
    TokenNotYetValid,

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Invalid audience")]
    InvalidAudience,

    #[error("Failed to extract token claims")]
    ClaimExtractionFailure,
}

impl AuthError {
    /// Stable identifier for logs and audit trails.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "MISSING_HEADER",
            AuthError::MalformedScheme => "MALFORMED_SCHEME",
            AuthError::MalformedToken(_) => "MALFORMED_TOKEN",
            AuthError::UnknownKey(_) => "UNKNOWN_KEY",
            AuthError::UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            AuthError::InvalidSignature => "INVALID_SIGNATURE",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            AuthError::InvalidIssuer => "INVALID_ISSUER",
            AuthError::InvalidAudience => "INVALID_AUDIENCE",
            AuthError::ClaimExtractionFailure => "CLAIM_EXTRACTION_FAILURE",
        }
    }

    /// Internal failures are reported as 500 rather than 401.
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::ClaimExtractionFailure)
    }
}

/// Failure to obtain or parse the key set.
///
/// `Clone` so that callers coalesced onto one fetch can all receive its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JwksError {
    #[error("failed to fetch JWKS from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("timed out fetching JWKS from {url}")]
    Timeout { url: String },

    #[error("JWKS endpoint {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("JWKS response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("failed to parse JWKS: {0}")]
    Parse(String),

    #[error("no usable signing keys in JWKS")]
    NoUsableKeys,

    #[error("JWKS refetch suppressed, last attempt was {elapsed_ms}ms ago")]
    Cooldown { elapsed_ms: u128 },
}
