//! Data models for gmna-ba (batch audit service)

pub mod aggregate;
pub mod audit_result;
pub mod backup;
pub mod batch;
pub mod business;
pub mod error_log;
pub mod session;

pub use aggregate::{AuditAggregate, AuditDetail, AuditSummary, ComplianceStatus, LocalComparison, StoredAudit};
pub use audit_result::{AuditResult, AuditScores, MAX_IMPROVEMENT_POINTS};
pub use backup::{AuditSnapshot, BackupMetadata, BackupRecord, BackupType};
pub use batch::{BatchOutcome, BatchReport, PersistenceOutcome};
pub use business::BusinessRecord;
pub use error_log::ErrorLogEntry;
pub use session::{BatchSession, SessionRegistry, SessionState};
