//! OIDC configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path of the JWKS document relative to the issuer URL.
pub const JWKS_PATH: &str = "/oauth/v2/keys";

/// Token verification and key cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcConfig {
    /// Token issuer (iss claim). Compared by exact string equality.
    /// Example: "https://idp.example.com"
    pub issuer: String,

    /// Explicit JWKS endpoint. When unset the endpoint is derived from the
    /// issuer as `<issuer>/oauth/v2/keys`.
    pub jwks_url: Option<String>,

    /// Expected audience (aud claim).
    pub audience: Option<String>,

    /// Reject tokens whose `aud` does not contain `audience`.
    pub enforce_audience: bool,

    /// Background JWKS refresh period in seconds.
    pub jwks_refresh_secs: u64,

    /// Timeout for a single JWKS fetch in seconds.
    pub jwks_fetch_timeout_secs: u64,

    /// Minimum gap between refetches triggered by unknown key IDs.
    pub jwks_refetch_cooldown_secs: u64,

    /// Clock skew tolerance in seconds for exp/nbf validation.
    pub clock_skew_secs: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            jwks_url: None,
            audience: None,
            enforce_audience: false,
            jwks_refresh_secs: 300,
            jwks_fetch_timeout_secs: 10,
            jwks_refetch_cooldown_secs: 5,
            clock_skew_secs: 0,
        }
    }
}

impl OidcConfig {
    /// The JWKS endpoint to fetch signing keys from.
    pub fn jwks_url(&self) -> String {
        match self.jwks_url {
            Some(ref url) => url.clone(),
            None => format!("{}{}", self.issuer.trim_end_matches('/'), JWKS_PATH),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_refresh_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.jwks_fetch_timeout_secs)
    }

    pub fn refetch_cooldown(&self) -> Duration {
        Duration::from_secs(self.jwks_refetch_cooldown_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.issuer.is_empty() {
            return Err("OIDC issuer is required".to_string());
        }

        if !is_http_url(&self.issuer) {
            return Err("OIDC issuer must be a valid HTTP(S) URL".to_string());
        }

        if let Some(ref url) = self.jwks_url {
            if !is_http_url(url) {
                return Err("OIDC jwks_url must be a valid HTTP(S) URL".to_string());
            }
        }

        if self.enforce_audience && self.audience.as_deref().unwrap_or("").is_empty() {
            return Err("OIDC audience is required when audience enforcement is on".to_string());
        }

        if self.jwks_refresh_secs == 0 {
            return Err("JWKS refresh interval must be greater than zero".to_string());
        }

        if self.jwks_fetch_timeout_secs == 0 {
            return Err("JWKS fetch timeout must be greater than zero".to_string());
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// JSON overlay applied on top of command line configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OidcConfigJson {
    pub issuer: Option<String>,
    pub jwks_url: Option<String>,
    pub audience: Option<String>,
    pub enforce_audience: Option<bool>,
    pub jwks_refresh_secs: Option<u64>,
    pub jwks_fetch_timeout_secs: Option<u64>,
    pub jwks_refetch_cooldown_secs: Option<u64>,
    pub clock_skew_secs: Option<u64>,
}

impl OidcConfigJson {
    /// Apply JSON config to existing config.
    pub fn apply_to(&self, config: &mut OidcConfig) {
        if let Some(ref issuer) = self.issuer {
            config.issuer = issuer.clone();
        }
        if let Some(ref jwks_url) = self.jwks_url {
            config.jwks_url = Some(jwks_url.clone());
        }
        if let Some(ref audience) = self.audience {
            config.audience = Some(audience.clone());
        }
        if let Some(enforce) = self.enforce_audience {
            config.enforce_audience = enforce;
        }
        if let Some(refresh) = self.jwks_refresh_secs {
            config.jwks_refresh_secs = refresh;
        }
        if let Some(timeout) = self.jwks_fetch_timeout_secs {
            config.jwks_fetch_timeout_secs = timeout;
        }
        if let Some(cooldown) = self.jwks_refetch_cooldown_secs {
            config.jwks_refetch_cooldown_secs = cooldown;
        }
        if let Some(skew) = self.clock_skew_secs {
            config.clock_skew_secs = skew;
        }
    }
}
