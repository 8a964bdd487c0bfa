//! Backup listing, restore, replay and cleanup

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audits::ListQuery;
use crate::error::ApiResult;
use crate::models::BackupRecord;
use crate::services::ReplayReport;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    /// Defaults to the configured retention
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub retention_days: u32,
    pub deleted: u64,
}

/// GET /backups?limit=N
pub async fn list_backups(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<BackupRecord>>> {
    Ok(Json(state.persistence.list_backups(query.limit()).await?))
}

/// GET /backups/{backup_id} - stored payload
pub async fn restore_backup(
    State(state): State<AppState>,
    Path(backup_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(state.persistence.restore_backup(backup_id).await?))
}

/// POST /backups/replay - push local emergency snapshots into the store
pub async fn replay_emergency_backups(
    State(state): State<AppState>,
) -> ApiResult<Json<ReplayReport>> {
    let report = state.persistence.replay_emergency_backups().await?;
    Ok(Json(report))
}

/// POST /backups/cleanup?days=N
pub async fn cleanup_backups(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<CleanupResponse>> {
    let retention_days = query.days.unwrap_or(state.retention_days);
    let deleted = state.persistence.cleanup_old_backups(retention_days).await?;
    Ok(Json(CleanupResponse {
        retention_days,
        deleted,
    }))
}

pub fn backup_routes() -> Router<AppState> {
    Router::new()
        .route("/backups", get(list_backups))
        .route("/backups/replay", post(replay_emergency_backups))
        .route("/backups/cleanup", post(cleanup_backups))
        .route("/backups/:backup_id", get(restore_backup))
}
