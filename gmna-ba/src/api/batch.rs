//! Batch audit API handlers
//!
//! POST /batch/start, GET /batch/status, POST /batch/cancel,
//! GET /batch/results, GET /batch/export

use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use gmna_common::events::{AuditEvent, BatchProgress};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    AuditResult, BatchOutcome, BatchReport, BatchSession, BusinessRecord, PersistenceOutcome,
    SessionState,
};
use crate::services::export::{self, ExportFormat};
use crate::services::input_parser;
use crate::AppState;

/// Name used when the upload carries no file name
const DEFAULT_UPLOAD_NAME: &str = "upload.csv";

/// POST /batch/start response
#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub total: usize,
    pub skipped_rows: usize,
    pub started_at: DateTime<Utc>,
}

/// GET /batch/status response
#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    #[serde(flatten)]
    pub session: BatchSession,
    pub result_count: usize,
    pub elapsed_seconds: u64,
}

/// POST /batch/cancel response
#[derive(Debug, Serialize)]
pub struct CancelBatchResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    /// Items started before the stop request
    pub processed: usize,
    pub total: usize,
}

/// GET /batch/results response
#[derive(Debug, Serialize)]
pub struct BatchResultsResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub results: Vec<AuditResult>,
    pub persistence: Option<PersistenceOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

struct Upload {
    file_name: String,
    bytes: Vec<u8>,
    tenant_id: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<Upload> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut tenant_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart data: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("tenant_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid tenant_id: {}", e)))?;
                tenant_id = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring multipart field");
            }
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("Missing multipart field: file".to_string()))?;

    Ok(Upload {
        file_name,
        bytes,
        tenant_id,
    })
}

/// POST /batch/start
///
/// Parse the uploaded list and start the batch in the background.
pub async fn start_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<StartBatchResponse>> {
    if !state.auditor.is_configured() {
        return Err(ApiError::ServiceUnavailable(
            "Analysis provider API key not configured".to_string(),
        ));
    }

    let upload = read_upload(multipart).await?;
    let parsed = input_parser::parse_file(&upload.file_name, &upload.bytes)?;

    let session = BatchSession::new(
        upload.file_name,
        upload.tenant_id.clone(),
        parsed.records.len(),
        parsed.skipped_rows,
    );
    let response = StartBatchResponse {
        session_id: session.session_id,
        state: session.state,
        total: session.total,
        skipped_rows: session.skipped_rows,
        started_at: session.started_at,
    };

    // Token first so a stop request can never find the session without one
    let session_id = response.session_id;
    let cancel = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(session_id, cancel.clone());

    if state.sessions.insert_if_idle(session).is_err() {
        state.cancellation_tokens.write().await.remove(&session_id);
        return Err(ApiError::Conflict("Batch already running".to_string()));
    }

    state.event_bus.emit_lossy(AuditEvent::BatchStarted {
        session_id,
        total: response.total,
        skipped_rows: response.skipped_rows,
        timestamp: Utc::now(),
    });

    tracing::info!(
        session_id = %session_id,
        total = response.total,
        skipped_rows = response.skipped_rows,
        "Batch session started"
    );

    tokio::spawn(execute_batch(
        state.clone(),
        session_id,
        parsed.records,
        upload.tenant_id,
        cancel,
    ));

    Ok(Json(response))
}

/// Background task for one batch session
///
/// The batch loop runs in its own task so a panic in it still ends the
/// session as failed.
async fn execute_batch(
    state: AppState,
    session_id: Uuid,
    records: Vec<BusinessRecord>,
    tenant_id: Option<String>,
    cancel: CancellationToken,
) {
    tracing::info!(session_id = %session_id, "Background batch task started");

    let controller = state.batch_controller();
    let sessions = state.sessions.clone();
    let event_bus = state.event_bus.clone();

    let run = tokio::spawn(async move {
        let observer = move |progress: &BatchProgress| {
            sessions.update(session_id, |s| s.update_progress(progress));
            event_bus.emit_lossy(AuditEvent::BatchProgressUpdate {
                session_id,
                progress: progress.clone(),
                timestamp: Utc::now(),
            });
        };
        controller.run(&records, tenant_id, &observer, &cancel).await
    });

    match run.await {
        Ok(report) => finish_session(&state, session_id, report).await,
        Err(e) => {
            let message = format!("Batch task failed: {}", e);
            tracing::error!(session_id = %session_id, error = %e, "Batch task failed");
            state.sessions.update(session_id, |s| s.fail(message.clone()));
            state.event_bus.emit_lossy(AuditEvent::BatchFailed {
                session_id,
                error: message.clone(),
                timestamp: Utc::now(),
            });
            state.record_error(message).await;
        }
    }

    state.cancellation_tokens.write().await.remove(&session_id);
}

async fn finish_session(state: &AppState, session_id: Uuid, report: BatchReport) {
    state.sessions.update(session_id, |s| s.finish(&report));

    let audit_id = report.persistence.audit_id();
    let event = match report.outcome {
        BatchOutcome::Completed => AuditEvent::BatchCompleted {
            session_id,
            results: report.results.len(),
            audit_id,
            timestamp: Utc::now(),
        },
        BatchOutcome::Interrupted => AuditEvent::BatchInterrupted {
            session_id,
            results: report.results.len(),
            total: state
                .sessions
                .get(session_id)
                .map(|s| s.total)
                .unwrap_or(report.results.len()),
            audit_id,
            timestamp: Utc::now(),
        },
    };
    state.event_bus.emit_lossy(event);

    match &report.persistence {
        PersistenceOutcome::EmergencyFallback { snapshot_key } => {
            state
                .record_error(format!(
                    "Store unavailable; results kept in emergency backup {}",
                    snapshot_key
                ))
                .await;
        }
        PersistenceOutcome::Failed { message } => {
            state.record_error(message.clone()).await;
        }
        PersistenceOutcome::Stored { .. } | PersistenceOutcome::Skipped => {}
    }

    tracing::info!(
        session_id = %session_id,
        outcome = ?report.outcome,
        results = report.results.len(),
        "Batch session finished"
    );
}

fn find_session(state: &AppState, session_id: Uuid) -> ApiResult<BatchSession> {
    state
        .sessions
        .get(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("Batch session not found: {}", session_id)))
}

/// GET /batch/status/{session_id}
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<BatchStatusResponse>> {
    let session = find_session(&state, session_id)?;
    tracing::debug!(session_id = %session_id, state = ?session.state, "Status query");

    Ok(Json(BatchStatusResponse {
        result_count: session.results.len(),
        elapsed_seconds: session.elapsed_seconds(),
        session,
    }))
}

/// POST /batch/cancel/{session_id}
///
/// Requests a stop; the batch ends at the next item boundary.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<CancelBatchResponse>> {
    let session = find_session(&state, session_id)?;
    if session.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Batch session already in terminal state: {:?}",
            session.state
        )));
    }

    if let Some(token) = state.cancellation_tokens.read().await.get(&session_id) {
        token.cancel();
    }
    state.sessions.update(session_id, |s| s.request_stop());
    let session = find_session(&state, session_id)?;

    tracing::info!(session_id = %session_id, "Batch stop requested");

    Ok(Json(CancelBatchResponse {
        session_id,
        state: session.state,
        processed: session.progress.current,
        total: session.total,
    }))
}

fn finished_session(state: &AppState, session_id: Uuid) -> ApiResult<BatchSession> {
    let session = find_session(state, session_id)?;
    if !session.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Batch session still running: {}",
            session_id
        )));
    }
    Ok(session)
}

/// GET /batch/results/{session_id}
pub async fn get_batch_results(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<BatchResultsResponse>> {
    let session = finished_session(&state, session_id)?;

    Ok(Json(BatchResultsResponse {
        session_id,
        state: session.state,
        results: session.results,
        persistence: session.persistence,
    }))
}

/// GET /batch/export/{session_id}?format=xlsx|csv
pub async fn export_batch(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format = match query.format.as_deref() {
        Some(format) => format.parse::<ExportFormat>()?,
        None => ExportFormat::default(),
    };
    let session = finished_session(&state, session_id)?;

    let bytes = export::export(&session.results, format)?;
    let file_name = format!(
        "auditoria_gmn_{}.{}",
        session.started_at.format("%Y%m%d_%H%M%S"),
        format.extension()
    );

    tracing::info!(
        session_id = %session_id,
        format = format.extension(),
        rows = session.results.len(),
        "Batch results exported"
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batch/start", post(start_batch))
        .route("/batch/status/:session_id", get(get_batch_status))
        .route("/batch/cancel/:session_id", post(cancel_batch))
        .route("/batch/results/:session_id", get(get_batch_results))
        .route("/batch/export/:session_id", get(export_batch))
}
