//! PaaS PostgreSQL API
//!
//! Provisions logical databases on a shared PostgreSQL server. Every
//! `/api/v1` route requires a bearer token issued by the configured OpenID
//! Connect provider and verified against its published key set.

mod api;
mod oidc;
mod postgres;

#[cfg(test)]
mod test_support;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use api::AppState;
use oidc::{spawn_refresh_task, JwksCache, OidcConfig, OidcConfigJson, TokenVerifier};
use postgres::PgDatabaseAdmin;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "paas-db-api")]
#[command(about = "Database provisioning API gated by OIDC bearer tokens")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080", env = "LISTEN_ADDR")]
    listen: SocketAddr,

    /// PostgreSQL connection string
    #[arg(long, env = "POSTGRES_DSN")]
    database_url: String,

    /// Token issuer; the JWKS endpoint is `<issuer>/oauth/v2/keys`
    #[arg(long, env = "OIDC_ISSUER")]
    issuer: Option<String>,

    /// Override the JWKS endpoint derived from the issuer
    #[arg(long, env = "OIDC_JWKS_URL")]
    jwks_url: Option<String>,

    /// Expected token audience (the API's client ID)
    #[arg(long, env = "OIDC_AUDIENCE")]
    audience: Option<String>,

    /// Reject tokens whose audience does not include --audience
    #[arg(long, env = "OIDC_ENFORCE_AUDIENCE")]
    enforce_audience: bool,

    /// Background JWKS refresh period in seconds
    #[arg(long, default_value_t = 300, env = "JWKS_REFRESH_SECS")]
    jwks_refresh_secs: u64,

    /// Timeout for one JWKS fetch in seconds
    #[arg(long, default_value_t = 10, env = "JWKS_FETCH_TIMEOUT_SECS")]
    jwks_fetch_timeout_secs: u64,

    /// Minimum seconds between refetches caused by unknown key IDs
    #[arg(long, default_value_t = 5, env = "JWKS_REFETCH_COOLDOWN_SECS")]
    jwks_refetch_cooldown_secs: u64,

    /// Clock skew tolerance for exp/nbf in seconds
    #[arg(long, default_value_t = 0, env = "CLOCK_SKEW_SECS")]
    clock_skew_secs: u64,

    /// JSON file whose settings override the OIDC flags
    #[arg(long, env = "OIDC_CONFIG_FILE")]
    oidc_config_file: Option<PathBuf>,

    /// Origins allowed to call the API from a browser (comma-separated)
    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:8086"
    )]
    cors_origins: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

impl Args {
    /// Build the OIDC configuration from flags and the optional overlay file.
    fn oidc_config(&self) -> Result<OidcConfig> {
        let mut config = OidcConfig {
            issuer: self.issuer.clone().unwrap_or_default(),
            jwks_url: self.jwks_url.clone(),
            audience: self.audience.clone(),
            enforce_audience: self.enforce_audience,
            jwks_refresh_secs: self.jwks_refresh_secs,
            jwks_fetch_timeout_secs: self.jwks_fetch_timeout_secs,
            jwks_refetch_cooldown_secs: self.jwks_refetch_cooldown_secs,
            clock_skew_secs: self.clock_skew_secs,
        };

        if let Some(path) = &self.oidc_config_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read OIDC config file: {:?}", path))?;
            let overlay: OidcConfigJson = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse OIDC config file: {:?}", path))?;
            overlay.apply_to(&mut config);
        }

        config
            .validate()
            .map_err(|e| anyhow!("OIDC config validation failed: {}", e))?;

        Ok(config)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},tower_http={}",
            env!("CARGO_CRATE_NAME"),
            log_level,
            log_level
        ))
        .json()
        .init();

    info!("Starting PaaS database API");

    let oidc_config = args.oidc_config()?;

    info!(
        issuer = %oidc_config.issuer,
        jwks_url = %oidc_config.jwks_url(),
        enforce_audience = oidc_config.enforce_audience,
        refresh_secs = oidc_config.jwks_refresh_secs,
        "Configuration loaded"
    );

    // No route can be authenticated without an initial key set
    let jwks = Arc::new(JwksCache::new(&oidc_config).await?);
    let refresh_handle = spawn_refresh_task(Arc::clone(&jwks), oidc_config.refresh_interval());

    let verifier = Arc::new(TokenVerifier::new(&oidc_config, Arc::clone(&jwks)));
    let db = PgDatabaseAdmin::connect_lazy(&args.database_url)?;
    let cors = api::cors_layer(&args.cors_origins)?;

    let app = api::router(AppState::new(Arc::new(db)), verifier, cors);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    refresh_handle.abort();
    info!("Server stopped");

    Ok(())
}
