//! Batch controller
//!
//! Drives the auditor across a list of business records strictly one at a
//! time, in input order.
//!
//! **Per item:**
//! 1. Stop (without error) if the cancellation token is set
//! 2. Report progress to the observer
//! 3. Audit; a failure becomes an error placeholder result, never an abort
//! 4. Wait the inter-item delay (skipped after the last item, cut short by
//!    cancellation)
//!
//! After the loop, a non-empty result set is handed to persistence.

use gmna_common::events::BatchProgress;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auditor::Auditor;
use super::persistence::PersistenceService;
use crate::models::{
    AuditResult, AuditSnapshot, BackupType, BatchOutcome, BatchReport, BusinessRecord,
    PersistenceOutcome,
};

/// Segment recorded when the first record has no category
pub const DEFAULT_SEGMENT: &str = "Diversos";

/// Segment recorded for interrupted batches
pub const PARTIAL_SEGMENT: &str = "Parcial";

/// Receives per-item progress
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &BatchProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &BatchProgress) {
        self(progress)
    }
}

/// Sequential batch runner
pub struct BatchController {
    auditor: Arc<dyn Auditor>,
    persistence: Arc<PersistenceService>,
    inter_item_delay: Duration,
}

impl BatchController {
    pub fn new(
        auditor: Arc<dyn Auditor>,
        persistence: Arc<PersistenceService>,
        inter_item_delay: Duration,
    ) -> Self {
        Self {
            auditor,
            persistence,
            inter_item_delay,
        }
    }

    pub fn auditor(&self) -> &Arc<dyn Auditor> {
        &self.auditor
    }

    pub fn persistence(&self) -> &Arc<PersistenceService> {
        &self.persistence
    }

    /// Audit `records` and persist the results
    ///
    /// Returns one result per processed record, in input order. The result
    /// count equals `records.len()` unless `cancel` fired first.
    pub async fn run(
        &self,
        records: &[BusinessRecord],
        tenant_id: Option<String>,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let total = records.len();
        let mut results: Vec<AuditResult> = Vec::with_capacity(total);
        let mut outcome = BatchOutcome::Completed;

        info!(total, delay_ms = self.inter_item_delay.as_millis() as u64, "Batch started");

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(processed = index, total, "Batch stopped by operator");
                outcome = BatchOutcome::Interrupted;
                break;
            }

            observer.on_progress(&BatchProgress::processing(index + 1, total, &record.name));

            match self.auditor.audit(record).await {
                Ok(result) => {
                    debug!(
                        business = %record.name,
                        overall_score = result.scores.overall_score,
                        "Business audited"
                    );
                    results.push(result);
                }
                Err(e) => {
                    warn!(
                        business = %record.name,
                        index = index + 1,
                        error = %e,
                        "Audit failed, recording placeholder"
                    );
                    results.push(AuditResult::error_placeholder(record));
                }
            }

            if index + 1 < total && !self.inter_item_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.inter_item_delay) => {}
                    _ = cancel.cancelled() => {
                        debug!("Stop requested during inter-item delay");
                    }
                }
            }
        }

        if outcome == BatchOutcome::Completed {
            observer.on_progress(&BatchProgress::completed(total));
        }

        let persistence = if results.is_empty() {
            debug!("No results, skipping persistence");
            PersistenceOutcome::Skipped
        } else {
            let snapshot = snapshot_for(records, tenant_id, outcome, results.clone());
            self.persistence.persist(&snapshot).await
        };

        info!(
            results = results.len(),
            total,
            outcome = ?outcome,
            persistence = ?persistence,
            "Batch finished"
        );

        BatchReport {
            results,
            outcome,
            persistence,
        }
    }
}

/// Snapshot metadata comes from the first record of the batch
fn snapshot_for(
    records: &[BusinessRecord],
    tenant_id: Option<String>,
    outcome: BatchOutcome,
    results: Vec<AuditResult>,
) -> AuditSnapshot {
    let first = records.first();
    let city = first.map(|r| r.city.clone()).unwrap_or_default();
    let state = first.and_then(|r| r.state.clone());

    let (segment, backup_type) = match outcome {
        BatchOutcome::Interrupted => (PARTIAL_SEGMENT.to_string(), BackupType::Partial),
        BatchOutcome::Completed => (
            first
                .and_then(|r| r.category.clone())
                .unwrap_or_else(|| DEFAULT_SEGMENT.to_string()),
            BackupType::Full,
        ),
    };

    AuditSnapshot::new(segment, city, state, tenant_id, backup_type, results)
}
