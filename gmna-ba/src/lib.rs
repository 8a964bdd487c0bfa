//! gmna-ba library interface
//!
//! Batch audit of Google Business Profile presence: parse an uploaded list
//! of businesses, audit each one through the analysis provider, persist the
//! aggregate with retry and local fallback, and export the results.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use gmna_common::config::TomlConfig;
use gmna_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::models::SessionRegistry;
use crate::services::{Auditor, BatchController, PersistenceService};

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Per-business analysis
    pub auditor: Arc<dyn Auditor>,
    /// Store writes, backups and emergency fallback
    pub persistence: Arc<PersistenceService>,
    /// Pause between two audits
    pub inter_item_delay: Duration,
    /// Default age limit for backup cleanup
    pub retention_days: u32,
    /// Batch sessions started since startup
    pub sessions: SessionRegistry,
    /// Cancellation tokens for running batch sessions
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        auditor: Arc<dyn Auditor>,
        persistence: Arc<PersistenceService>,
        config: &TomlConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            auditor,
            persistence,
            inter_item_delay: Duration::from_millis(config.batch.inter_item_delay_ms),
            retention_days: config.persistence.retention_days,
            sessions: SessionRegistry::new(),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn batch_controller(&self) -> BatchController {
        BatchController::new(
            self.auditor.clone(),
            self.persistence.clone(),
            self.inter_item_delay,
        )
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_routes())
        .merge(api::audit_routes())
        .merge(api::backup_routes())
        .merge(api::error_routes())
        .merge(api::health_routes())
        .route("/batch/events", axum::routing::get(api::batch_event_stream))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
