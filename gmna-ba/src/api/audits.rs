//! Stored audit queries

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{AuditDetail, AuditSummary};
use crate::AppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// GET /audits?limit=N - newest first
pub async fn list_audits(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<AuditSummary>>> {
    let audits = state.persistence.recent_audits(query.limit()).await?;
    Ok(Json(audits))
}

/// GET /audits/{audit_id} - aggregate plus companies, best score first
pub async fn get_audit(
    State(state): State<AppState>,
    Path(audit_id): Path<Uuid>,
) -> ApiResult<Json<AuditDetail>> {
    let detail = state
        .persistence
        .load_audit(audit_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Audit not found: {}", audit_id)))?;
    Ok(Json(detail))
}

pub fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/audits", get(list_audits))
        .route("/audits/:audit_id", get(get_audit))
}
