//! Database access for gmna-ba
//!
//! SQLite database in the root folder holding audit aggregates, per-company
//! rows, backup records and the error log.

pub mod store;

pub use store::{AuditStore, SqliteAuditStore};

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the database file (and its parent directory) on first start.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Single connection: every connection to `sqlite::memory:` is a separate
/// database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create gmna-ba tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audits (
            id TEXT PRIMARY KEY,
            tenant_id TEXT,
            segment TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT,
            overall_score INTEGER NOT NULL,
            compliance_status TEXT NOT NULL,
            opportunities TEXT NOT NULL DEFAULT '[]',
            suggestions TEXT NOT NULL DEFAULT '[]',
            local_comparison TEXT NOT NULL DEFAULT '{}',
            analysis_summary TEXT NOT NULL DEFAULT '',
            companies_analyzed INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_companies (
            id TEXT PRIMARY KEY,
            audit_id TEXT NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
            tenant_id TEXT,
            position INTEGER NOT NULL,
            company_name TEXT NOT NULL,
            city TEXT NOT NULL,
            overall_score REAL NOT NULL,
            should_invite_for_optimization INTEGER NOT NULL,
            result TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_companies_audit ON audit_companies(audit_id, overall_score)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_backups (
            id TEXT PRIMARY KEY,
            audit_id TEXT,
            payload TEXT NOT NULL,
            backup_type TEXT NOT NULL CHECK (backup_type IN ('full', 'partial', 'emergency')),
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS error_logs (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '{}',
            recovered INTEGER NOT NULL DEFAULT 0,
            recovery_attempts INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (audits, audit_companies, audit_backups, error_logs)");

    Ok(())
}
