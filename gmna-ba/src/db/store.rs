//! Audit store
//!
//! [`AuditStore`] is the injectable interface to the backing data store;
//! [`SqliteAuditStore`] implements it on the service database.
//!
//! UUIDs are stored as TEXT. Timestamps are RFC 3339 UTC with fixed
//! microsecond precision so that lexical order equals chronological order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gmna_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    AuditAggregate, AuditDetail, AuditResult, AuditSnapshot, AuditSummary, BackupRecord,
    BackupType, ComplianceStatus, ErrorLogEntry, StoredAudit,
};

/// Backing store for audits, backups and the error log
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Write aggregate, company rows and a backup record atomically
    ///
    /// The snapshot id becomes the audit id. Saving a snapshot that is
    /// already stored is a no-op returning the same id.
    async fn save_audit(&self, snapshot: &AuditSnapshot) -> Result<Uuid>;

    async fn load_audit(&self, audit_id: Uuid) -> Result<Option<AuditDetail>>;

    /// Most recent audits first
    async fn recent_audits(&self, limit: usize) -> Result<Vec<AuditSummary>>;

    async fn get_backup(&self, backup_id: Uuid) -> Result<Option<BackupRecord>>;

    /// Most recent backups first
    async fn list_backups(&self, limit: usize) -> Result<Vec<BackupRecord>>;

    /// Delete non-emergency backups created before `cutoff`
    async fn delete_backups_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn record_error(&self, entry: &ErrorLogEntry) -> Result<()>;

    /// Most recent error log entries first
    async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorLogEntry>>;
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse UUID '{}': {}", value, e)))
}

fn parse_compliance(value: &str) -> Result<ComplianceStatus> {
    match value {
        "green" => Ok(ComplianceStatus::Green),
        "yellow" => Ok(ComplianceStatus::Yellow),
        "red" => Ok(ComplianceStatus::Red),
        other => Err(Error::Internal(format!("Unknown compliance status: {}", other))),
    }
}

/// SQLite implementation of [`AuditStore`]
#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backup_from_row(row: &SqliteRow) -> Result<BackupRecord> {
    let id: String = row.try_get("id")?;
    let audit_id: Option<String> = row.try_get("audit_id")?;
    let payload: String = row.try_get("payload")?;
    let backup_type: String = row.try_get("backup_type")?;
    let metadata: String = row.try_get("metadata")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(BackupRecord {
        id: parse_uuid(&id)?,
        audit_id: audit_id.as_deref().map(parse_uuid).transpose()?,
        payload: serde_json::from_str(&payload)?,
        backup_type: backup_type.parse::<BackupType>().map_err(Error::Internal)?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<StoredAudit> {
    let id: String = row.try_get("id")?;
    let compliance: String = row.try_get("compliance_status")?;
    let opportunities: String = row.try_get("opportunities")?;
    let suggestions: String = row.try_get("suggestions")?;
    let local_comparison: String = row.try_get("local_comparison")?;
    let companies_analyzed: i64 = row.try_get("companies_analyzed")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(StoredAudit {
        id: parse_uuid(&id)?,
        tenant_id: row.try_get("tenant_id")?,
        aggregate: AuditAggregate {
            segment: row.try_get("segment")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            overall_score: row.try_get("overall_score")?,
            compliance_status: parse_compliance(&compliance)?,
            opportunities: serde_json::from_str(&opportunities)?,
            suggestions: serde_json::from_str(&suggestions)?,
            local_comparison: serde_json::from_str(&local_comparison)?,
            analysis_summary: row.try_get("analysis_summary")?,
            companies_analyzed: companies_analyzed.max(0) as usize,
        },
        created_at: parse_timestamp(&created_at)?,
    })
}

fn error_from_row(row: &SqliteRow) -> Result<ErrorLogEntry> {
    let timestamp: String = row.try_get("timestamp")?;
    let context: String = row.try_get("context")?;
    let recovery_attempts: i64 = row.try_get("recovery_attempts")?;

    Ok(ErrorLogEntry {
        timestamp: parse_timestamp(&timestamp)?,
        kind: row.try_get("kind")?,
        message: row.try_get("message")?,
        context: serde_json::from_str(&context)?,
        recovered: row.try_get("recovered")?,
        recovery_attempts: recovery_attempts.max(0) as u32,
    })
}

async fn insert_backup<'e, E>(executor: E, backup: &BackupRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let payload = serde_json::to_string(&backup.payload)?;
    let metadata = serde_json::to_string(&backup.metadata)?;

    sqlx::query(
        r#"
        INSERT INTO audit_backups (id, audit_id, payload, backup_type, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(backup.id.to_string())
    .bind(backup.audit_id.map(|id| id.to_string()))
    .bind(&payload)
    .bind(backup.backup_type.as_str())
    .bind(&metadata)
    .bind(format_timestamp(&backup.created_at))
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn save_audit(&self, snapshot: &AuditSnapshot) -> Result<Uuid> {
        let aggregate = AuditAggregate::from_results(
            &snapshot.segment,
            &snapshot.city,
            snapshot.state.as_deref(),
            &snapshot.results,
        )
        .ok_or_else(|| Error::InvalidInput("No companies to save".to_string()))?;

        // Prepare all data before acquiring a connection
        let audit_id = snapshot.id;
        let audit_id_str = audit_id.to_string();
        let now = Utc::now();
        let created_at = format_timestamp(&now);
        let opportunities = serde_json::to_string(&aggregate.opportunities)?;
        let suggestions = serde_json::to_string(&aggregate.suggestions)?;
        let local_comparison = serde_json::to_string(&aggregate.local_comparison)?;

        let mut companies = Vec::with_capacity(snapshot.results.len());
        for (position, result) in snapshot.results.iter().enumerate() {
            companies.push((position as i64, result, serde_json::to_string(result)?));
        }

        let backup = BackupRecord {
            id: Uuid::new_v4(),
            audit_id: Some(audit_id),
            payload: snapshot.payload(),
            backup_type: snapshot.backup_type,
            metadata: snapshot.metadata(),
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM audits WHERE id = ?")
            .bind(&audit_id_str)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            tx.rollback().await?;
            tracing::info!(audit_id = %audit_id, "Audit already stored, skipping write");
            return Ok(audit_id);
        }

        sqlx::query(
            r#"
            INSERT INTO audits (
                id, tenant_id, segment, city, state, overall_score, compliance_status,
                opportunities, suggestions, local_comparison, analysis_summary,
                companies_analyzed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit_id_str)
        .bind(&snapshot.tenant_id)
        .bind(&aggregate.segment)
        .bind(&aggregate.city)
        .bind(&aggregate.state)
        .bind(aggregate.overall_score)
        .bind(aggregate.compliance_status.as_str())
        .bind(&opportunities)
        .bind(&suggestions)
        .bind(&local_comparison)
        .bind(&aggregate.analysis_summary)
        .bind(aggregate.companies_analyzed as i64)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;

        for (position, result, json) in &companies {
            sqlx::query(
                r#"
                INSERT INTO audit_companies (
                    id, audit_id, tenant_id, position, company_name, city,
                    overall_score, should_invite_for_optimization, result
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&audit_id_str)
            .bind(&snapshot.tenant_id)
            .bind(*position)
            .bind(&result.business.name)
            .bind(&result.business.city)
            .bind(result.scores.overall_score)
            .bind(result.scores.should_invite_for_optimization)
            .bind(json)
            .execute(&mut *tx)
            .await?;
        }

        insert_backup(&mut *tx, &backup).await?;

        tx.commit().await?;

        tracing::info!(
            audit_id = %audit_id,
            companies = snapshot.results.len(),
            backup_type = %snapshot.backup_type,
            overall_score = aggregate.overall_score,
            "Audit stored"
        );

        Ok(audit_id)
    }

    async fn load_audit(&self, audit_id: Uuid) -> Result<Option<AuditDetail>> {
        let audit_id_str = audit_id.to_string();

        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, segment, city, state, overall_score, compliance_status,
                   opportunities, suggestions, local_comparison, analysis_summary,
                   companies_analyzed, created_at
            FROM audits
            WHERE id = ?
            "#,
        )
        .bind(&audit_id_str)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let audit = audit_from_row(&row)?;

        let company_rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT result FROM audit_companies
            WHERE audit_id = ?
            ORDER BY overall_score DESC, position ASC
            "#,
        )
        .bind(&audit_id_str)
        .fetch_all(&self.pool)
        .await?;

        let companies = company_rows
            .iter()
            .map(|json| serde_json::from_str::<AuditResult>(json).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(AuditDetail { audit, companies }))
    }

    async fn recent_audits(&self, limit: usize) -> Result<Vec<AuditSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, segment, city, overall_score, companies_analyzed, created_at
            FROM audits
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AuditSummary> {
                let id: String = row.try_get("id")?;
                let companies_analyzed: i64 = row.try_get("companies_analyzed")?;
                let created_at: String = row.try_get("created_at")?;
                Ok(AuditSummary {
                    audit_id: parse_uuid(&id)?,
                    segment: row.try_get("segment")?,
                    city: row.try_get("city")?,
                    overall_score: row.try_get("overall_score")?,
                    companies_analyzed: companies_analyzed.max(0) as usize,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    async fn get_backup(&self, backup_id: Uuid) -> Result<Option<BackupRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, audit_id, payload, backup_type, metadata, created_at
            FROM audit_backups
            WHERE id = ?
            "#,
        )
        .bind(backup_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(backup_from_row).transpose()
    }

    async fn list_backups(&self, limit: usize) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, audit_id, payload, backup_type, metadata, created_at
            FROM audit_backups
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(backup_from_row).collect()
    }

    async fn delete_backups_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM audit_backups WHERE created_at < ? AND backup_type != 'emergency'",
        )
        .bind(format_timestamp(&cutoff))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn record_error(&self, entry: &ErrorLogEntry) -> Result<()> {
        let context = serde_json::to_string(&entry.context)?;

        sqlx::query(
            r#"
            INSERT INTO error_logs (id, timestamp, kind, message, context, recovered, recovery_attempts)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(format_timestamp(&entry.timestamp))
        .bind(&entry.kind)
        .bind(&entry.message)
        .bind(&context)
        .bind(entry.recovered)
        .bind(entry.recovery_attempts as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, kind, message, context, recovered, recovery_attempts
            FROM error_logs
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(error_from_row).collect()
    }
}
