//! OIDC bearer token verification with JWKS support.
//!
//! Provides token validation using JSON Web Key Sets (JWKS) with background
//! key rotation and caching.

pub mod config;
pub mod error;
pub mod jwks;
pub mod refresh;
pub mod verifier;

pub use config::{OidcConfig, OidcConfigJson};
pub use error::AuthError;
pub use jwks::JwksCache;
pub use refresh::spawn_refresh_task;
pub use verifier::{Claims, TokenVerifier};
