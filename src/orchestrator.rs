//! Migration runs.
//!
//! One run covers one timing class of one changeset and owns its own rollback scope:
//!
//! ```text
//! Init -> Verifying -> Executing -> Committed
//!                          |
//!                          +-> RollingBack -> RolledBack
//! ```
//!
//! A task list that cannot be resolved against the live database, or a backup that cannot be
//! made, ends the run in `RolledBack` without ever entering `Executing`. Once execution fails,
//! every table touched by the run is restored, not just the one that failed.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditKey, AuditLog};
use crate::backup::BackupManager;
use crate::changeset::{Changeset, Partition, Timing};
use crate::constants::{DEFAULT_BACKUP_SUFFIX, DEFAULT_SCHEMA_NAME};
use crate::definition::Definition;
use crate::driver::Driver;
use crate::error::MigrationError;
use crate::executor::Executor;
use crate::hooks::HookProvider;
use crate::task::{self, TaskList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Verifying,
    Executing,
    RollingBack,
    RolledBack,
    Committed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Committed | RunState::RolledBack)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Verifying => "verifying",
            RunState::Executing => "executing",
            RunState::RollingBack => "rolling back",
            RunState::RolledBack => "rolled back",
            RunState::Committed => "committed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timing: Timing,
    /// When false, no table is copied; the decision is still audited per table.
    pub backup: bool,
    pub backup_suffix: String,
    /// Checksum of the changeset file, recorded with the run.
    pub checksum: Option<String>,
    /// Schema name and target version every audit entry of the run is keyed by
    pub schema_name: String,
    pub version: Option<String>,
}

impl RunOptions {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            backup: true,
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
            checksum: None,
            schema_name: DEFAULT_SCHEMA_NAME.to_string(),
            version: None,
        }
    }

    pub fn audit_key(&self) -> AuditKey {
        AuditKey::new(&self.schema_name, self.version.as_deref(), self.timing)
    }
}

/// Outcome of a run that reached a terminal state.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub timing: Timing,
    pub state: RunState,
    /// Every state the run passed through, in order
    pub states: Vec<RunState>,
    pub tasks: TaskList,
    /// Tables copied before execution, as `(table, backup)`
    pub backups: Vec<(String, String)>,
    /// Operations completed before the run ended
    pub completed: Vec<String>,
    pub restored: Vec<String>,
    /// Why the run rolled back
    pub failure: Option<MigrationError>,
}

impl RunReport {
    pub fn committed(&self) -> bool {
        self.state == RunState::Committed
    }
}

pub struct Orchestrator<'a, D, H, A> {
    driver: &'a mut D,
    hooks: &'a mut H,
    audit: &'a mut A,
    options: RunOptions,
    key: AuditKey,
    run_id: Uuid,
    states: Vec<RunState>,
}

impl<'a, D: Driver, H: HookProvider, A: AuditLog> Orchestrator<'a, D, H, A> {
    pub fn new(driver: &'a mut D, hooks: &'a mut H, audit: &'a mut A, options: RunOptions) -> Self {
        Self {
            driver,
            hooks,
            audit,
            key: options.audit_key(),
            options,
            run_id: Uuid::new_v4(),
            states: vec![RunState::Init],
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Init)
    }

    /// Run one timing class of `changeset`.
    ///
    /// Verification, backup and execution failures end in `Ok` with a `RolledBack` report. Only a
    /// failed rollback, or an audit log that is unusable at setup, is returned as `Err`.
    pub async fn run(mut self, changeset: &Changeset) -> Result<RunReport, MigrationError> {
        let timing = self.options.timing;

        self.audit.check().await.map_err(MigrationError::Audit)?;
        self.record(
            AuditAction::RunStarted,
            None,
            json!({
                "timing": timing,
                "backup": self.options.backup,
                "checksum": self.options.checksum,
            }),
        )
        .await;
        info!(
            run_id = %self.run_id,
            schema_name = %self.key.schema_name,
            version = self.key.version.as_deref().unwrap_or("-"),
            %timing,
            "Migration run started"
        );

        let partition = changeset.partition(timing);
        let mut report = RunReport {
            run_id: self.run_id,
            timing,
            state: RunState::Init,
            states: Vec::new(),
            tasks: TaskList::default(),
            backups: Vec::new(),
            completed: Vec::new(),
            restored: Vec::new(),
            failure: None,
        };

        self.enter(RunState::Verifying);
        let live = match task::build(partition, self.driver).await {
            Ok((tasks, live)) => {
                report.tasks = tasks;
                live
            }
            Err(e) => {
                return Ok(self.abort(report, MigrationError::driver("verification", e)));
            }
        };

        if !report.tasks.is_resolved() {
            for unresolved in &report.tasks.unresolved {
                warn!(%unresolved, "Unresolved changeset entry");
            }
            let unresolved = report.tasks.unresolved.clone();
            return Ok(self.abort(report, MigrationError::Unverifiable(unresolved)));
        }

        if report.tasks.is_empty() {
            info!(%timing, "Nothing to do");
            self.enter(RunState::Committed);
            self.record(AuditAction::Committed, None, json!({ "tasks": 0 }))
                .await;
            return Ok(self.finish(report));
        }

        let mut backups = BackupManager::new(&self.options.backup_suffix);
        for table in backup_targets(partition, &live) {
            if !self.options.backup {
                self.record(
                    AuditAction::BackupIgnored,
                    Some(&table),
                    json!({ "reason": "backups disabled" }),
                )
                .await;
                continue;
            }

            match backups.backup_table(self.driver, &table).await {
                Ok(snapshot) => {
                    let backup = snapshot.backup.clone();
                    report.backups.push((table.clone(), backup.clone()));
                    self.record(
                        AuditAction::BackupCreated,
                        Some(&table),
                        json!({ "backup": backup }),
                    )
                    .await;
                }
                Err(e) => {
                    error!(table = %table, error = %format!("{:#}", e), "Backup failed");
                    backups.discard(self.driver).await;
                    report.backups.clear();
                    return Ok(self.abort(
                        report,
                        MigrationError::BackupFailed {
                            table,
                            source: e,
                        },
                    ));
                }
            }
        }

        self.enter(RunState::Executing);
        let mut executor = Executor::new(&mut *self.driver, &mut *self.hooks, &mut backups);
        let outcome = executor.execute(&report.tasks).await;
        report.completed = executor.into_progress().completed;

        match outcome {
            Ok(()) => {
                let dropped = backups.commit(self.driver).await;
                for backup in &dropped {
                    self.record(
                        AuditAction::BackupDropped,
                        None,
                        json!({ "backup": backup }),
                    )
                    .await;
                }
                self.enter(RunState::Committed);
                self.record(
                    AuditAction::Committed,
                    None,
                    json!({ "tasks": report.tasks.len() }),
                )
                .await;
                info!(run_id = %self.run_id, %timing, operations = report.completed.len(), "Migration run committed");
                Ok(self.finish(report))
            }
            Err(failure) => {
                error!(%timing, error = %failure, "Execution failed, rolling back");
                self.enter(RunState::RollingBack);

                match backups.rollback(self.driver).await {
                    Ok(restored) => {
                        self.enter(RunState::RolledBack);
                        self.record(
                            AuditAction::RolledBack,
                            None,
                            json!({ "restored": restored, "cause": failure.to_string() }),
                        )
                        .await;
                        if !self.options.backup {
                            warn!("Backups were disabled: changed tables could not be restored");
                        }
                        report.restored = restored;
                        report.failure = Some(failure);
                        Ok(self.finish(report))
                    }
                    Err(failures) => {
                        for failed in &failures {
                            self.record(
                                AuditAction::RollbackFailed,
                                Some(&failed.table),
                                json!({ "reason": failed.reason, "cause": failure.to_string() }),
                            )
                            .await;
                        }
                        error!(
                            tables = failures.len(),
                            "Rollback failed, manual intervention required"
                        );
                        Err(MigrationError::RollbackFailed { failures })
                    }
                }
            }
        }
    }

    fn enter(&mut self, state: RunState) {
        info!(run_id = %self.run_id, from = %self.state(), to = %state, "Run state");
        self.states.push(state);
    }

    /// End a run that never started executing.
    fn abort(mut self, mut report: RunReport, failure: MigrationError) -> RunReport {
        warn!(error = %failure, "Run aborted before execution");
        self.enter(RunState::RolledBack);
        report.failure = Some(failure);
        self.finish(report)
    }

    fn finish(self, mut report: RunReport) -> RunReport {
        report.state = self.state();
        report.states = self.states;
        report
    }

    async fn record(&mut self, action: AuditAction, table: Option<&str>, context: serde_json::Value) {
        let entry = AuditEntry::new(self.run_id, &self.key, action, table, context);
        if let Err(e) = self.audit.record(&entry).await {
            warn!(action = %action, error = %format!("{:#}", e), "Failed to write audit entry");
        }
    }
}

/// Pre-existing tables the partition mutates or drops, under their current live names.
///
/// Changes to a renamed table are backed up under the name it had before the rename, unless only
/// the new name exists already.
pub fn backup_targets(partition: &Partition, live: &Definition) -> Vec<String> {
    let mut targets: BTreeSet<String> = partition
        .affected_tables()
        .into_iter()
        .filter(|t| live.contains_table(t))
        .collect();

    // a rename applied by an earlier run leaves only the new name
    let tables = &partition.tables;
    for (name, change) in &tables.change {
        if !change.is_empty()
            && !live.contains_table(tables.original_name(name))
            && live.contains_table(name)
        {
            targets.insert(name.clone());
        }
    }

    targets.into_iter().collect()
}
