//! Error log queries

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use super::audits::ListQuery;
use crate::error::ApiResult;
use crate::models::ErrorLogEntry;
use crate::AppState;

/// GET /errors?limit=N - store failures and recoveries, newest first
pub async fn list_errors(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ErrorLogEntry>>> {
    Ok(Json(state.persistence.recent_errors(query.limit()).await?))
}

pub fn error_routes() -> Router<AppState> {
    Router::new().route("/errors", get(list_errors))
}
