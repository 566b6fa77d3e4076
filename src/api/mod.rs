//! HTTP surface: public root route and token-gated database routes.

pub mod auth;
pub mod databases;

use anyhow::{Context, Result};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{middleware, Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::oidc::TokenVerifier;
use crate::postgres::{DatabaseAdmin, DbError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseAdmin>,
}

impl AppState {
    pub fn new(db: Arc<dyn DatabaseAdmin>) -> Self {
        Self { db }
    }
}

/// Handler failures, rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) | ApiError::Db(DbError::InvalidName) => StatusCode::BAD_REQUEST,
            ApiError::Db(DbError::Sql(ref e)) => {
                warn!(error = %e, "Database statement failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the application router.
pub fn router(state: AppState, verifier: Arc<TokenVerifier>, cors: CorsLayer) -> Router {
    let protected = Router::new()
        .route(
            "/databases",
            get(databases::list_databases).post(databases::create_database),
        )
        .route("/databases/{name}", delete(databases::drop_database))
        .route_layer(middleware::from_fn_with_state(verifier, auth::require_bearer));

    Router::new()
        .route("/", get(root))
        .nest("/api/v1", protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// CORS policy for the browser frontend.
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin: {}", o))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([ORIGIN, CONTENT_TYPE, AUTHORIZATION])
        .expose_headers([CONTENT_LENGTH])
        .allow_credentials(true)
        .max_age(Duration::from_secs(12 * 60 * 60)))
}

async fn root() -> &'static str {
    "Hello from PaaS(PostgresSql) API!"
}
