//! Batch run outcomes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuditResult;

/// How the batch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    /// Every record was processed
    Completed,
    /// Stopped by the operator before the last record
    Interrupted,
}

/// Where the batch results ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    /// Written to the store under this audit id
    Stored { audit_id: Uuid },
    /// Store writes exhausted; snapshot kept in the local emergency log
    EmergencyFallback { snapshot_key: String },
    /// Nothing to persist (zero results)
    Skipped,
    /// Neither the store nor the local log accepted the snapshot
    Failed { message: String },
}

impl PersistenceOutcome {
    /// Store identifier, `None` unless the store write succeeded
    pub fn audit_id(&self) -> Option<Uuid> {
        match self {
            PersistenceOutcome::Stored { audit_id } => Some(*audit_id),
            _ => None,
        }
    }
}

/// Everything a finished batch produced
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Results in input order
    pub results: Vec<AuditResult>,
    pub outcome: BatchOutcome,
    pub persistence: PersistenceOutcome,
}

impl BatchReport {
    pub fn is_interrupted(&self) -> bool {
        self.outcome == BatchOutcome::Interrupted
    }
}
