//! Backup records and audit snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::AuditResult;

/// Format version stamped into backup metadata
pub const BACKUP_FORMAT_VERSION: &str = "1.0.0";

/// Source tag for backups written by the batch pipeline
pub const BATCH_AUDIT_SOURCE: &str = "batch_audit";

/// Kind of backup
///
/// Emergency backups are exempt from age-based cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Partial,
    Emergency,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Partial => "partial",
            BackupType::Emergency => "emergency",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "partial" => Ok(BackupType::Partial),
            "emergency" => Ok(BackupType::Emergency),
            other => Err(format!("Unknown backup type: {}", other)),
        }
    }
}

/// Descriptive metadata stored next to a backup payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub source: String,
    pub record_count: usize,
    /// Serialized payload size in bytes
    pub size: usize,
    pub compressed: bool,
    pub version: String,
}

/// Backup row as stored in `audit_backups`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub audit_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub backup_type: BackupType,
    pub metadata: BackupMetadata,
    pub created_at: DateTime<Utc>,
}

/// Self-contained unit handed to a durable sink
///
/// Carries everything needed to rebuild the audit aggregate, so a snapshot
/// parked in the local log can later be replayed into the store unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    pub id: Uuid,
    pub segment: String,
    pub city: String,
    pub state: Option<String>,
    pub tenant_id: Option<String>,
    pub backup_type: BackupType,
    pub results: Vec<AuditResult>,
    pub created_at: DateTime<Utc>,
}

impl AuditSnapshot {
    pub fn new(
        segment: impl Into<String>,
        city: impl Into<String>,
        state: Option<String>,
        tenant_id: Option<String>,
        backup_type: BackupType,
        results: Vec<AuditResult>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment: segment.into(),
            city: city.into(),
            state,
            tenant_id,
            backup_type,
            results,
            created_at: Utc::now(),
        }
    }

    /// Backup payload: `{"results": [...]}`
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({ "results": self.results })
    }

    /// Metadata describing [`AuditSnapshot::payload`]
    pub fn metadata(&self) -> BackupMetadata {
        let size = serde_json::to_vec(&self.results)
            .map(|bytes| bytes.len())
            .unwrap_or(0);

        BackupMetadata {
            source: BATCH_AUDIT_SOURCE.to_string(),
            record_count: self.results.len(),
            size,
            compressed: false,
            version: BACKUP_FORMAT_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BusinessRecord;

    #[test]
    fn test_backup_type_round_trips_through_str() {
        for ty in [BackupType::Full, BackupType::Partial, BackupType::Emergency] {
            assert_eq!(ty.as_str().parse::<BackupType>().unwrap(), ty);
        }
        assert!("weekly".parse::<BackupType>().is_err());
    }

    #[test]
    fn test_snapshot_metadata_counts_results() {
        let results = vec![
            AuditResult::error_placeholder(&BusinessRecord::new("A", "X")),
            AuditResult::error_placeholder(&BusinessRecord::new("B", "X")),
        ];
        let snapshot = AuditSnapshot::new("Diversos", "X", None, None, BackupType::Full, results);

        let metadata = snapshot.metadata();
        assert_eq!(metadata.record_count, 2);
        assert_eq!(metadata.source, BATCH_AUDIT_SOURCE);
        assert_eq!(metadata.version, BACKUP_FORMAT_VERSION);
        assert!(metadata.size > 0);
        assert_eq!(snapshot.payload()["results"].as_array().unwrap().len(), 2);
    }
}
