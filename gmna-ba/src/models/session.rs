//! Batch session state
//!
//! One session per uploaded file. The registry in `AppState` holds sessions
//! for the life of the process so status and results stay queryable after
//! the batch ends.

use chrono::{DateTime, Utc};
use gmna_common::events::BatchProgress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{AuditResult, BatchOutcome, BatchReport, PersistenceOutcome};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    /// Batch loop running
    Running,
    /// Stop requested, waiting for the loop to reach an item boundary
    Stopping,
    /// Every record processed
    Completed,
    /// Stopped before the last record
    Interrupted,
    /// Batch task failed outside the per-item error handling
    Failed,
}

/// Batch session (in-memory state)
#[derive(Debug, Clone, Serialize)]
pub struct BatchSession {
    pub session_id: Uuid,
    pub state: SessionState,
    /// Uploaded file name
    pub file_name: String,
    pub tenant_id: Option<String>,
    /// Records accepted by the parser
    pub total: usize,
    /// Rows dropped by the parser
    pub skipped_rows: usize,
    pub progress: BatchProgress,
    /// Results, available once the session is terminal
    #[serde(skip)]
    pub results: Vec<AuditResult>,
    pub persistence: Option<PersistenceOutcome>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchSession {
    pub fn new(
        file_name: impl Into<String>,
        tenant_id: Option<String>,
        total: usize,
        skipped_rows: usize,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: SessionState::Running,
            file_name: file_name.into(),
            tenant_id,
            total,
            skipped_rows,
            progress: BatchProgress::processing(0, total, "Iniciando"),
            results: Vec::new(),
            persistence: None,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn update_progress(&mut self, progress: &BatchProgress) {
        self.progress = progress.clone();
    }

    /// Mark a stop request; no effect on terminal sessions
    pub fn request_stop(&mut self) -> bool {
        if self.state == SessionState::Running {
            self.state = SessionState::Stopping;
            true
        } else {
            false
        }
    }

    /// Record the batch report and move to its terminal state
    pub fn finish(&mut self, report: &BatchReport) {
        self.state = match report.outcome {
            BatchOutcome::Completed => SessionState::Completed,
            BatchOutcome::Interrupted => SessionState::Interrupted,
        };
        self.results = report.results.clone();
        self.persistence = Some(report.persistence.clone());
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = SessionState::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SessionState::Completed | SessionState::Interrupted | SessionState::Failed
        )
    }

    pub fn elapsed_seconds(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds().max(0) as u64
    }
}

/// Finished sessions kept for status, results and export queries
pub const MAX_FINISHED_SESSIONS: usize = 10;

/// Shared session map
///
/// Guarded by a blocking lock: the batch progress observer is synchronous.
/// Guards are never held across an await.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, BatchSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, BatchSession>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, BatchSession>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `session` unless another batch is still active
    ///
    /// Check and insert happen under one write lock. Finished sessions beyond
    /// [`MAX_FINISHED_SESSIONS`] are dropped, oldest first.
    pub fn insert_if_idle(&self, session: BatchSession) -> Result<(), BatchSession> {
        let mut sessions = self.write();
        if sessions.values().any(|s| !s.is_terminal()) {
            return Err(session);
        }

        let mut finished: Vec<(DateTime<Utc>, Uuid)> = sessions
            .values()
            .map(|s| (s.started_at, s.session_id))
            .collect();
        if finished.len() >= MAX_FINISHED_SESSIONS {
            finished.sort();
            let excess = finished.len() + 1 - MAX_FINISHED_SESSIONS;
            for (_, id) in finished.into_iter().take(excess) {
                sessions.remove(&id);
            }
            tracing::debug!(evicted = excess, "Finished batch sessions evicted");
        }

        sessions.insert(session.session_id, session);
        Ok(())
    }

    pub fn get(&self, session_id: Uuid) -> Option<BatchSession> {
        self.read().get(&session_id).cloned()
    }

    /// Apply `f` to a session, `None` if unknown
    pub fn update<R>(&self, session_id: Uuid, f: impl FnOnce(&mut BatchSession) -> R) -> Option<R> {
        self.write().get_mut(&session_id).map(f)
    }

    pub fn has_active(&self) -> bool {
        self.read().values().any(|s| !s.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BusinessRecord;

    #[test]
    fn test_stop_then_interrupted_report() {
        let mut session = BatchSession::new("lista.csv", None, 3, 1);
        assert!(session.request_stop());
        assert_eq!(session.state, SessionState::Stopping);
        assert!(!session.is_terminal());

        let report = BatchReport {
            results: vec![AuditResult::error_placeholder(&BusinessRecord::new("A", "B"))],
            outcome: BatchOutcome::Interrupted,
            persistence: PersistenceOutcome::Skipped,
        };
        session.finish(&report);

        assert_eq!(session.state, SessionState::Interrupted);
        assert_eq!(session.results.len(), 1);
        assert!(session.ended_at.is_some());
        assert!(!session.request_stop());
    }

    #[test]
    fn test_status_json_omits_results() {
        let session = BatchSession::new("lista.csv", Some("t1".into()), 2, 0);
        let json = serde_json::to_value(&session).unwrap();

        assert_eq!(json["state"], "RUNNING");
        assert_eq!(json["progress"]["current_item"], "Iniciando");
        assert!(json.get("results").is_none());
    }

    #[test]
    fn test_registry_admits_one_active_batch() {
        let registry = SessionRegistry::new();
        let first = BatchSession::new("a.csv", None, 2, 0);
        let first_id = first.session_id;

        assert!(registry.insert_if_idle(first).is_ok());
        assert!(registry.has_active());
        assert!(registry
            .insert_if_idle(BatchSession::new("b.csv", None, 1, 0))
            .is_err());

        registry.update(first_id, |s| s.fail("boom"));
        assert!(!registry.has_active());
        assert!(registry
            .insert_if_idle(BatchSession::new("b.csv", None, 1, 0))
            .is_ok());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(first_id).unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_registry_evicts_oldest_finished_sessions() {
        let registry = SessionRegistry::new();
        let mut ids = Vec::new();

        for i in 0..MAX_FINISHED_SESSIONS + 3 {
            let mut session = BatchSession::new(format!("{}.csv", i), None, 1, 0);
            session.started_at = Utc::now() + chrono::Duration::seconds(i as i64);
            let id = session.session_id;
            registry.insert_if_idle(session).unwrap();
            registry.update(id, |s| s.fail("done"));
            ids.push(id);
        }

        assert_eq!(registry.len(), MAX_FINISHED_SESSIONS);
        assert!(registry.get(ids[0]).is_none());
        assert!(registry.get(ids[2]).is_none());
        assert!(registry.get(ids[3]).is_some());
        assert!(registry.get(*ids.last().unwrap()).is_some());
    }
}
