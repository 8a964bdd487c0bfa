//! Persistence and backup
//!
//! Batch results are written through a [`DurableSink`]. The primary sink is
//! the audit store; when every retry against it fails, the snapshot is parked
//! in a local append-only log of JSON files and can later be replayed.
//!
//! State of one persist call:
//! `ATTEMPTING → (STORED | RETRY × max_attempts → EMERGENCY_FALLBACK | FAILED)`.
//! None of these outcomes is returned as an error to the batch.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use gmna_common::config::PersistenceSettings;
use gmna_common::events::{AuditEvent, EventBus};
use gmna_common::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::AuditStore;
use crate::models::{
    AuditDetail, AuditSnapshot, AuditSummary, BackupRecord, BackupType, ErrorLogEntry,
    PersistenceOutcome,
};
use crate::utils::{Attempted, RetryFailure, RetryPolicy};

/// File name prefix of local emergency snapshots
pub const EMERGENCY_FILE_PREFIX: &str = "emergency_backup_";

/// Somewhere a snapshot can be written durably
#[async_trait]
pub trait DurableSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write the snapshot, returning a key that identifies it in this sink
    async fn write(&self, snapshot: &AuditSnapshot) -> Result<String>;
}

/// Sink writing to the audit store
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<dyn AuditStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Aggregate, company rows and backup record in one transaction
    pub async fn save(&self, snapshot: &AuditSnapshot) -> Result<Uuid> {
        self.store.save_audit(snapshot).await
    }
}

#[async_trait]
impl DurableSink for StoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn write(&self, snapshot: &AuditSnapshot) -> Result<String> {
        self.save(snapshot).await.map(|id| id.to_string())
    }
}

/// Local append-only log of emergency snapshots
///
/// One JSON file per snapshot, named
/// `emergency_backup_{unix_millis:013}_{snapshot_id}.json` so that lexical
/// order is chronological. At most `cap` files are kept; the oldest are
/// evicted first.
#[derive(Debug, Clone)]
pub struct LocalBackupLog {
    dir: PathBuf,
    cap: usize,
}

impl LocalBackupLog {
    pub fn new(dir: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            dir: dir.into(),
            cap: cap.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_for(snapshot: &AuditSnapshot) -> String {
        format!(
            "{}{:013}_{}",
            EMERGENCY_FILE_PREFIX,
            snapshot.created_at.timestamp_millis().max(0),
            snapshot.id
        )
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Keys of stored snapshots, oldest first
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(key) = name
                .strip_suffix(".json")
                .filter(|stem| stem.starts_with(EMERGENCY_FILE_PREFIX))
            {
                keys.push(key.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }

    pub async fn read(&self, key: &str) -> Result<AuditSnapshot> {
        let bytes = tokio::fs::read(self.path_for(key)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        tokio::fs::remove_file(self.path_for(key)).await?;
        Ok(())
    }

    async fn evict_over_cap(&self) -> Result<usize> {
        let keys = self.list().await?;
        let excess = keys.len().saturating_sub(self.cap);

        for key in &keys[..excess] {
            warn!(key = %key, cap = self.cap, "Evicting oldest emergency backup");
            self.remove(key).await?;
        }
        Ok(excess)
    }
}

#[async_trait]
impl DurableSink for LocalBackupLog {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn write(&self, snapshot: &AuditSnapshot) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let key = Self::key_for(snapshot);
        let path = self.path_for(&key);
        let tmp_path = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        self.evict_over_cap().await?;

        info!(key = %key, records = snapshot.results.len(), "Emergency backup written");
        Ok(key)
    }
}

/// Outcome of an emergency replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    /// Snapshots still in the local log
    pub remaining: usize,
    /// Audit ids created by this replay
    pub audit_ids: Vec<Uuid>,
}

/// Writes batch results with retry and local fallback
pub struct PersistenceService {
    store: Arc<dyn AuditStore>,
    primary: StoreSink,
    local: LocalBackupLog,
    policy: RetryPolicy,
    event_bus: Option<EventBus>,
}

impl PersistenceService {
    pub fn new(store: Arc<dyn AuditStore>, local: LocalBackupLog, policy: RetryPolicy) -> Self {
        Self {
            primary: StoreSink::new(store.clone()),
            store,
            local,
            policy,
            event_bus: None,
        }
    }

    /// Build from `[persistence]` settings: linear backoff, emergency cap
    pub fn from_settings(
        store: Arc<dyn AuditStore>,
        emergency_dir: impl Into<PathBuf>,
        settings: &PersistenceSettings,
    ) -> Self {
        Self::new(
            store,
            LocalBackupLog::new(emergency_dir, settings.emergency_cap),
            RetryPolicy::linear(
                settings.max_attempts,
                Duration::from_millis(settings.base_delay_ms),
            ),
        )
    }

    /// Publish emergency events on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn local_log(&self) -> &LocalBackupLog {
        &self.local
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist a snapshot, falling back to the local log when the store fails
    pub async fn persist(&self, snapshot: &AuditSnapshot) -> PersistenceOutcome {
        if snapshot.results.is_empty() {
            debug!(snapshot_id = %snapshot.id, "Nothing to persist");
            return PersistenceOutcome::Skipped;
        }

        let context = serde_json::json!({
            "operation": "save_audit",
            "snapshot_id": snapshot.id,
            "segment": snapshot.segment,
            "city": snapshot.city,
            "result_count": snapshot.results.len(),
        });

        let primary = &self.primary;
        let attempt = self
            .policy
            .run("save audit", Error::is_transient, move || primary.save(snapshot))
            .await;

        match attempt {
            Ok(Attempted {
                value: audit_id,
                attempts,
            }) => {
                if attempts > 1 {
                    self.log_error(
                        ErrorLogEntry::new("store", "Store write recovered after retry", context)
                            .with_attempts(attempts, true),
                    )
                    .await;
                }
                PersistenceOutcome::Stored { audit_id }
            }
            Err(RetryFailure { error, attempts }) => {
                self.log_error(
                    ErrorLogEntry::new("store", error.to_string(), context)
                        .with_attempts(attempts, false),
                )
                .await;

                warn!(
                    snapshot_id = %snapshot.id,
                    attempts,
                    error = %error,
                    "Store write failed, falling back to local emergency backup"
                );

                self.write_emergency(snapshot).await
            }
        }
    }

    async fn write_emergency(&self, snapshot: &AuditSnapshot) -> PersistenceOutcome {
        let mut emergency = snapshot.clone();
        emergency.backup_type = BackupType::Emergency;

        match self.local.write(&emergency).await {
            Ok(snapshot_key) => {
                if let Some(bus) = &self.event_bus {
                    bus.emit_lossy(AuditEvent::EmergencyBackupCreated {
                        snapshot_key: snapshot_key.clone(),
                        results: emergency.results.len(),
                        timestamp: Utc::now(),
                    });
                }
                PersistenceOutcome::EmergencyFallback { snapshot_key }
            }
            Err(e) => {
                error!(
                    snapshot_id = %snapshot.id,
                    error = %e,
                    "Emergency backup failed, results exist only in memory"
                );
                PersistenceOutcome::Failed {
                    message: format!("Store and local backup both failed: {}", e),
                }
            }
        }
    }

    /// Best effort: the store is often the thing that just failed
    async fn log_error(&self, entry: ErrorLogEntry) {
        if let Err(e) = self.store.record_error(&entry).await {
            debug!(error = %e, kind = %entry.kind, "Could not record error log entry");
        }
    }

    /// Replay local emergency snapshots into the store, oldest first
    ///
    /// A snapshot is removed from the local log only after the store accepted
    /// it. Failures leave the snapshot in place for the next replay.
    pub async fn replay_emergency_backups(&self) -> Result<ReplayReport> {
        let keys = self.local.list().await?;
        let mut report = ReplayReport::default();

        for key in keys {
            let mut snapshot = match self.local.read(&key).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(key = %key, error = %e, "Unreadable emergency backup left in place");
                    report.remaining += 1;
                    continue;
                }
            };
            snapshot.backup_type = BackupType::Emergency;

            match self.primary.save(&snapshot).await {
                Ok(audit_id) => {
                    self.local.remove(&key).await?;
                    info!(key = %key, audit_id = %audit_id, "Emergency backup replayed");
                    report.replayed += 1;
                    report.audit_ids.push(audit_id);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Emergency backup replay failed");
                    report.remaining += 1;
                }
            }
        }

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(AuditEvent::EmergencyBackupsReplayed {
                replayed: report.replayed,
                remaining: report.remaining,
                timestamp: Utc::now(),
            });
        }

        info!(
            replayed = report.replayed,
            remaining = report.remaining,
            "Emergency backup replay finished"
        );
        Ok(report)
    }

    /// Delete non-emergency backups older than `retention_days`
    pub async fn cleanup_old_backups(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        let deleted = self.store.delete_backups_before(cutoff).await?;

        info!(retention_days, deleted, "Old backups deleted");
        Ok(deleted)
    }

    pub async fn list_backups(&self, limit: usize) -> Result<Vec<BackupRecord>> {
        self.store.list_backups(limit).await
    }

    /// Payload of a stored backup
    pub async fn restore_backup(&self, backup_id: Uuid) -> Result<serde_json::Value> {
        let backup = self
            .store
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Backup not found: {}", backup_id)))?;

        info!(backup_id = %backup_id, backup_type = %backup.backup_type, "Backup restored");
        Ok(backup.payload)
    }

    pub async fn load_audit(&self, audit_id: Uuid) -> Result<Option<AuditDetail>> {
        self.store.load_audit(audit_id).await
    }

    pub async fn recent_audits(&self, limit: usize) -> Result<Vec<AuditSummary>> {
        self.store.recent_audits(limit).await
    }

    /// Error log, newest first
    pub async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorLogEntry>> {
        self.store.recent_errors(limit).await
    }

    /// Keys of snapshots waiting in the local log
    pub async fn pending_emergency_backups(&self) -> Result<Vec<String>> {
        self.local.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditResult, BusinessRecord};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn snapshot(n: usize) -> AuditSnapshot {
        let results = (0..n)
            .map(|i| AuditResult::error_placeholder(&BusinessRecord::new(format!("Empresa {}", i), "Manaus")))
            .collect();
        AuditSnapshot::new("Diversos", "Manaus", Some("AM".into()), None, BackupType::Full, results)
    }

    #[tokio::test]
    async fn test_local_log_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let log = LocalBackupLog::new(dir.path().join("emergency"), 10);
        let snapshot = snapshot(2);

        let key = log.write(&snapshot).await.unwrap();
        assert!(key.starts_with(EMERGENCY_FILE_PREFIX));
        assert_eq!(log.list().await.unwrap(), vec![key.clone()]);

        let read = log.read(&key).await.unwrap();
        assert_eq!(read, snapshot);

        log.remove(&key).await.unwrap();
        assert!(log.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_log_evicts_oldest_over_cap() {
        let dir = TempDir::new().unwrap();
        let log = LocalBackupLog::new(dir.path(), 2);

        let mut keys = Vec::new();
        for i in 0..3 {
            let mut s = snapshot(1);
            s.created_at = Utc::now() + ChronoDuration::seconds(i);
            keys.push(log.write(&s).await.unwrap());
        }

        assert_eq!(log.list().await.unwrap(), keys[1..].to_vec());
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let dir = TempDir::new().unwrap();
        let log = LocalBackupLog::new(dir.path().join("absent"), 10);
        assert!(log.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_keys_sort_chronologically() {
        let mut early = snapshot(1);
        let mut late = snapshot(1);
        early.created_at = Utc.timestamp_millis_opt(999).unwrap();
        late.created_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        assert!(LocalBackupLog::key_for(&early) < LocalBackupLog::key_for(&late));
    }
}
