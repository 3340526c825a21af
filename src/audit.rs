//! Audit log for migration runs.
//!
//! Every backup decision is recorded (performed or skipped), along with run start, rollback and
//! commit. Recording failures are logged and never stop a run; a log that cannot be used at all
//! is reported by [`AuditLog::check`] before the run starts.
//!
//! Entries are keyed by the upgraded schema's name, its target version and the timing class, so
//! the history of one upgrade can be read back with [`AuditLog::query`].

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::changeset::Timing;
use crate::config::TrackingTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RunStarted,
    BackupCreated,
    BackupIgnored,
    BackupDropped,
    RolledBack,
    RollbackFailed,
    Committed,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditAction::RunStarted => "run_started",
            AuditAction::BackupCreated => "backup_created",
            AuditAction::BackupIgnored => "backup_ignored",
            AuditAction::BackupDropped => "backup_dropped",
            AuditAction::RolledBack => "rolled_back",
            AuditAction::RollbackFailed => "rollback_failed",
            AuditAction::Committed => "committed",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run_started" => Ok(AuditAction::RunStarted),
            "backup_created" => Ok(AuditAction::BackupCreated),
            "backup_ignored" => Ok(AuditAction::BackupIgnored),
            "backup_dropped" => Ok(AuditAction::BackupDropped),
            "rolled_back" => Ok(AuditAction::RolledBack),
            "rollback_failed" => Ok(AuditAction::RollbackFailed),
            "committed" => Ok(AuditAction::Committed),
            other => bail!("unknown audit action '{}'", other),
        }
    }
}

/// Which upgrade an entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditKey {
    pub schema_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub timing: Timing,
}

impl AuditKey {
    pub fn new(schema_name: &str, version: Option<&str>, timing: Timing) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            version: version.map(str::to_string),
            timing,
        }
    }
}

/// Selects entries by schema name, optionally narrowed to one version and timing class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub schema_name: String,
    pub version: Option<String>,
    pub timing: Option<Timing>,
}

impl AuditFilter {
    pub fn matches(&self, key: &AuditKey) -> bool {
        key.schema_name == self.schema_name
            && self.version.as_ref().is_none_or(|v| key.version.as_ref() == Some(v))
            && self.timing.is_none_or(|t| key.timing == t)
    }
}

impl From<&AuditKey> for AuditFilter {
    fn from(key: &AuditKey) -> Self {
        Self {
            schema_name: key.schema_name.clone(),
            version: key.version.clone(),
            timing: Some(key.timing),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub key: AuditKey,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub context: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        run_id: Uuid,
        key: &AuditKey,
        action: AuditAction,
        table: Option<&str>,
        context: Value,
    ) -> Self {
        Self {
            run_id,
            key: key.clone(),
            action,
            table: table.map(str::to_string),
            context,
            recorded_at: Utc::now(),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait AuditLog {
    /// Confirm the log can be written. Called once before a run starts.
    async fn check(&mut self) -> Result<()> {
        Ok(())
    }

    async fn record(&mut self, entry: &AuditEntry) -> Result<()>;

    /// Entries matching `filter`, oldest first. Logs that keep nothing return nothing.
    async fn query(&mut self, _filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(Vec::new())
    }
}

/// Writes entries to the tracing log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditLog for TracingAudit {
    async fn record(&mut self, entry: &AuditEntry) -> Result<()> {
        info!(
            run_id = %entry.run_id,
            schema_name = %entry.key.schema_name,
            version = entry.key.version.as_deref().unwrap_or("-"),
            timing = %entry.key.timing,
            action = %entry.action,
            table = entry.table.as_deref().unwrap_or("-"),
            context = %entry.context,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryAudit {
    entries: Vec<AuditEntry>,
    unavailable: bool,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log whose setup check fails.
    pub fn unavailable() -> Self {
        Self {
            entries: Vec::new(),
            unavailable: true,
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.entries.iter().map(|e| e.action).collect()
    }
}

impl AuditLog for MemoryAudit {
    async fn check(&mut self) -> Result<()> {
        if self.unavailable {
            bail!("audit log is unavailable");
        }
        Ok(())
    }

    async fn record(&mut self, entry: &AuditEntry) -> Result<()> {
        if self.unavailable {
            bail!("audit log is unavailable");
        }
        self.entries.push(entry.clone());
        Ok(())
    }

    async fn query(&mut self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| filter.matches(&e.key))
            .cloned()
            .collect())
    }
}

/// Safely format a schema-qualified table name for SQL queries
/// This prevents SQL injection by properly escaping SQL identifiers
pub fn format_tracking_table_name(tracking_table: &TrackingTable) -> Result<String> {
    fn is_valid_sql_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if first.is_alphabetic() || first == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    }

    if !is_valid_sql_identifier(&tracking_table.schema) {
        bail!(
            "Invalid schema name '{}': must contain only letters, numbers, underscores, and dollar signs, starting with letter or underscore",
            tracking_table.schema
        );
    }

    if !is_valid_sql_identifier(&tracking_table.name) {
        bail!(
            "Invalid table name '{}': must contain only letters, numbers, underscores, and dollar signs, starting with letter or underscore",
            tracking_table.name
        );
    }

    Ok(format!(
        r#""{}"."{}""#,
        tracking_table.schema, tracking_table.name
    ))
}

/// Audit entries stored in a tracking table.
///
/// Uses its own pooled connection so that audit writes never interleave with the run's DDL.
pub struct PgAuditLog {
    pool: PgPool,
    table: TrackingTable,
}

impl PgAuditLog {
    pub fn new(pool: PgPool, table: TrackingTable) -> Self {
        Self { pool, table }
    }
}

impl AuditLog for PgAuditLog {
    async fn check(&mut self) -> Result<()> {
        let table_name = format_tracking_table_name(&self.table)?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                run_id UUID NOT NULL,
                schema_name TEXT NOT NULL,
                version TEXT,
                timing TEXT NOT NULL,
                action TEXT NOT NULL,
                table_name TEXT,
                context JSONB NOT NULL DEFAULT '{{}}',
                recorded_at TIMESTAMP WITH TIME ZONE NOT NULL,
                recorded_by TEXT DEFAULT CURRENT_USER
            )
            "#,
            table_name
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create audit table {}", table_name))?;

        Ok(())
    }

    async fn record(&mut self, entry: &AuditEntry) -> Result<()> {
        let table_name = format_tracking_table_name(&self.table)?;

        sqlx::query(&format!(
            "INSERT INTO {} (run_id, schema_name, version, timing, action, table_name, context, recorded_at) \
             VALUES ($1::uuid, $2, $3, $4, $5, $6, $7::jsonb, $8::timestamptz)",
            table_name
        ))
        .bind(entry.run_id.to_string())
        .bind(&entry.key.schema_name)
        .bind(entry.key.version.as_deref())
        .bind(entry.key.timing.to_string())
        .bind(entry.action.to_string())
        .bind(entry.table.as_deref())
        .bind(entry.context.to_string())
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record '{}' in {}", entry.action, table_name))?;

        Ok(())
    }

    async fn query(&mut self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let table_name = format_tracking_table_name(&self.table)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT
                run_id::text AS run_id,
                schema_name,
                version,
                timing,
                action,
                table_name,
                context::text AS context,
                to_json(recorded_at) #>> '{{}}' AS recorded_at
            FROM {}
            WHERE schema_name = $1
              AND ($2::text IS NULL OR version = $2)
              AND ($3::text IS NULL OR timing = $3)
            ORDER BY id
            "#,
            table_name
        ))
        .bind(&filter.schema_name)
        .bind(filter.version.as_deref())
        .bind(filter.timing.map(|t| t.to_string()))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read audit entries from {}", table_name))?;

        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<AuditEntry> {
    let run_id: String = row.try_get("run_id")?;
    let timing: String = row.try_get("timing")?;
    let action: String = row.try_get("action")?;
    let context: String = row.try_get("context")?;
    let recorded_at: String = row.try_get("recorded_at")?;
    let schema_name: String = row.try_get("schema_name")?;
    let version: Option<String> = row.try_get("version")?;

    Ok(AuditEntry {
        run_id: Uuid::parse_str(&run_id).context("Invalid run id in audit table")?,
        key: AuditKey {
            schema_name,
            version,
            timing: timing.parse().map_err(|e| anyhow!("Invalid timing in audit table: {}", e))?,
        },
        action: action.parse()?,
        table: row.try_get("table_name")?,
        context: serde_json::from_str(&context).context("Invalid context in audit table")?,
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .context("Invalid timestamp in audit table")?
            .with_timezone(&Utc),
    })
}
