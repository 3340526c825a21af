//! Failures of a migration run.

use thiserror::Error;

use crate::hooks::HookKey;
use crate::task::Unresolved;

/// A table that could not be restored during rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub table: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    /// The live database contradicts the changeset.
    #[error("{} cannot be applied to the live database", count_entries(.0))]
    Unverifiable(Vec<Unresolved>),

    #[error("hook {key} failed")]
    HookFailed { key: HookKey },

    #[error("{operation} failed: {source:#}")]
    Driver {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("backup of table '{table}' failed: {source:#}")]
    BackupFailed {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// The database may be structurally inconsistent and needs manual intervention.
    #[error("rollback failed for {} table(s): {}", .failures.len(), describe_failures(.failures))]
    RollbackFailed { failures: Vec<RestoreFailure> },

    #[error("audit log is not usable: {0:#}")]
    Audit(#[source] anyhow::Error),
}

fn count_entries(unresolved: &[Unresolved]) -> String {
    match unresolved.len() {
        1 => "1 changeset entry".to_string(),
        n => format!("{} changeset entries", n),
    }
}

fn describe_failures(failures: &[RestoreFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.table, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl MigrationError {
    pub fn driver(operation: impl Into<String>, source: anyhow::Error) -> Self {
        MigrationError::Driver {
            operation: operation.into(),
            source,
        }
    }

    /// Only a failed rollback leaves the database in a state this engine cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MigrationError::RollbackFailed { .. })
    }
}
