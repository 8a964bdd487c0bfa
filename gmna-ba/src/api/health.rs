//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database does not answer
    pub status: String,
    /// Module name ("gmna-ba")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Whether batches can be started (analysis key present)
    pub auditor_configured: bool,
    /// Whether a batch session is running or stopping
    pub batch_running: bool,
    /// Local emergency snapshots waiting for replay
    pub pending_emergency_backups: usize,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let database_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let pending_emergency_backups = state
        .persistence
        .pending_emergency_backups()
        .await
        .map(|keys| keys.len())
        .unwrap_or(0);

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if database_ok { "ok" } else { "degraded" }.to_string(),
        module: "gmna-ba".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        auditor_configured: state.auditor.is_configured(),
        batch_running: state.sessions.has_active(),
        pending_emergency_backups,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
