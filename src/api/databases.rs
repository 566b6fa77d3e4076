//! `/api/v1/databases` handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::auth::AuthenticatedClaims;
use super::{ApiError, AppState};
use crate::postgres::DatabaseName;

#[derive(Debug, Deserialize)]
pub struct CreateDatabaseRequest {
    #[serde(default, alias = "Name")]
    pub name: String,
}

pub async fn list_databases(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedClaims>,
) -> Result<Json<Vec<String>>, ApiError> {
    debug!(sub = ?caller.subject(), "Listing databases");
    let names = state.db.list_databases().await?;
    Ok(Json(names))
}

pub async fn create_database(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedClaims>,
    payload: Result<Json<CreateDatabaseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = match payload {
        Ok(Json(request)) if !request.name.is_empty() => request,
        _ => return Err(ApiError::BadRequest("Missing database name")),
    };

    let name = DatabaseName::parse(&request.name)?;
    state.db.create_database(&name).await?;
    info!(database = %name, sub = ?caller.subject(), "Provisioned database");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": name.as_str(), "name": name.as_str(), "status": "created" })),
    ))
}

pub async fn drop_database(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedClaims>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let name = DatabaseName::parse(&name)?;
    state.db.drop_database(&name).await?;
    info!(database = %name, sub = ?caller.subject(), "Removed database");

    Ok(Json(json!({ "result": "deleted" })))
}
