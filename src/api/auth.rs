//! Bearer token gate for protected routes.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::oidc::{AuthError, Claims, TokenVerifier};

/// Claims of the verified token, attached to the request for handlers.
#[derive(Debug, Clone)]
pub struct AuthenticatedClaims(pub Claims);

impl AuthenticatedClaims {
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(|v| v.as_str())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = if self.is_internal() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::UNAUTHORIZED
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Verify the `Authorization` header before running the inner handler.
pub async fn require_bearer(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = match request.headers().get(AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(v) => Some(v.to_owned()),
            Err(_) => return AuthError::MalformedScheme.into_response(),
        },
    };

    match verifier.verify_header(authorization.as_deref()).await {
        Ok(claims) => {
            request.extensions_mut().insert(AuthenticatedClaims(claims));
            next.run(request).await
        }
        Err(e) => {
            if e.is_internal() {
                warn!(
                    reason = e.reason_code(),
                    error = %e,
                    path = %request.uri().path(),
                    "Token verification failed"
                );
            } else {
                debug!(
                    reason = e.reason_code(),
                    error = %e,
                    path = %request.uri().path(),
                    "Request rejected"
                );
            }
            e.into_response()
        }
    }
}
