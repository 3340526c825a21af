//! Task execution.
//!
//! Tasks run in a fixed order: index removals, table removals, table renames, table alterations
//! (field renames, additions, changes and removals, then index additions), and finally table
//! additions with their nested indexes. Table and field operations are wrapped in before/after
//! hooks; index operations are not.
//!
//! The first failure stops execution. Recovery is the caller's job (see [`crate::backup`]).

use anyhow::Result;
use tracing::{debug, error, info};

use crate::backup::BackupManager;
use crate::driver::Driver;
use crate::error::MigrationError;
use crate::hooks::{HookKey, HookOperation, HookPhase, HookProvider};
use crate::task::TaskList;

/// What an execution got through before it finished or stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Completed operations, in order
    pub completed: Vec<String>,
    pub hooks_run: usize,
}

pub struct Executor<'a, D, H> {
    driver: &'a mut D,
    hooks: &'a mut H,
    backups: &'a mut BackupManager,
    progress: Progress,
}

impl<'a, D: Driver, H: HookProvider> Executor<'a, D, H> {
    pub fn new(driver: &'a mut D, hooks: &'a mut H, backups: &'a mut BackupManager) -> Self {
        Self {
            driver,
            hooks,
            backups,
            progress: Progress::default(),
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn into_progress(self) -> Progress {
        self.progress
    }

    pub async fn execute(&mut self, tasks: &TaskList) -> Result<(), MigrationError> {
        info!(tasks = tasks.len(), "Executing task list");

        for task in &tasks.indexes.remove {
            let table = task.table_name();
            let op = format!("remove {} {}.{}", task.cargo.kind(), table, task.name);
            let result = self.driver.drop_index(table, &task.cargo).await;
            self.done(op, result)?;
        }

        for task in &tasks.tables.remove {
            let key = HookKey::table(HookPhase::Before, HookOperation::RemoveTable, &task.name);
            self.before(&key).await?;
            let result = self.driver.drop_table(&task.name).await;
            self.done(format!("remove table {}", task.name), result)?;
            self.after(&key).await?;
        }

        for task in &tasks.tables.rename {
            let was = &task.cargo.was;
            let key = HookKey::table(HookPhase::Before, HookOperation::RenameTable, &task.name);
            self.before(&key).await?;
            let result = self.driver.rename_table(was, &task.name).await;
            self.done(format!("rename table {} -> {}", was, task.name), result)?;
            self.backups.track_rename(was, &task.name);
            self.after(&key).await?;
        }

        for task in &tasks.fields.rename {
            let table = task.table_name();
            let cargo = &task.cargo;
            let key = HookKey::field(
                HookPhase::Before,
                HookOperation::RenameField,
                table,
                &task.name,
            );
            self.before(&key).await?;
            let result = self.driver.rename_field(table, &cargo.was, &task.name).await;
            self.done(
                format!("rename field {}.{} -> {}", table, cargo.was, task.name),
                result,
            )?;
            if cargo.alter {
                let result = self.driver.alter_field(table, &cargo.field).await;
                self.done(
                    format!("alter field {}.{} {}", table, task.name, cargo.field.sql_type()),
                    result,
                )?;
            }
            self.after(&key).await?;
        }

        for task in &tasks.fields.add {
            let table = task.table_name();
            let key = HookKey::field(HookPhase::Before, HookOperation::AddField, table, &task.name);
            self.before(&key).await?;
            let result = self.driver.add_field(table, &task.cargo).await;
            self.done(
                format!("add field {}.{} {}", table, task.name, task.cargo.sql_type()),
                result,
            )?;
            self.after(&key).await?;
        }

        for task in &tasks.fields.change {
            let table = task.table_name();
            let key = HookKey::field(
                HookPhase::Before,
                HookOperation::AlterField,
                table,
                &task.name,
            );
            self.before(&key).await?;
            let result = self.driver.alter_field(table, &task.cargo).await;
            self.done(
                format!("alter field {}.{} {}", table, task.name, task.cargo.sql_type()),
                result,
            )?;
            self.after(&key).await?;
        }

        for task in &tasks.fields.remove {
            let table = task.table_name();
            let key = HookKey::field(
                HookPhase::Before,
                HookOperation::RemoveField,
                table,
                &task.name,
            );
            self.before(&key).await?;
            let result = self.driver.drop_field(table, &task.name).await;
            self.done(format!("remove field {}.{}", table, task.name), result)?;
            self.after(&key).await?;
        }

        for task in &tasks.indexes.add {
            let table = task.table_name();
            let op = format!("add {} {}.{}", task.cargo.kind(), table, task.name);
            let result = self.driver.create_index(table, &task.cargo).await;
            self.done(op, result)?;
        }

        for task in &tasks.tables.add {
            let key = HookKey::table(HookPhase::Before, HookOperation::AddTable, &task.name);
            self.before(&key).await?;
            let result = self.driver.create_table(&task.name, &task.cargo.fields).await;
            self.done(format!("add table {}", task.name), result)?;
            self.backups.track_added(&task.name);

            for index in &task.cargo.indexes {
                let op = format!("add {} {}.{}", index.cargo.kind(), task.name, index.name);
                let result = self.driver.create_index(&task.name, &index.cargo).await;
                self.done(op, result)?;
            }
            self.after(&key).await?;
        }

        info!(
            operations = self.progress.completed.len(),
            hooks = self.progress.hooks_run,
            "Task list executed"
        );
        Ok(())
    }

    fn done(&mut self, operation: String, result: Result<()>) -> Result<(), MigrationError> {
        match result {
            Ok(()) => {
                debug!(operation = %operation, "Done");
                self.progress.completed.push(operation);
                Ok(())
            }
            Err(e) => {
                error!(operation = %operation, error = %format!("{:#}", e), "Operation failed");
                Err(MigrationError::driver(operation, e))
            }
        }
    }

    async fn before(&mut self, key: &HookKey) -> Result<(), MigrationError> {
        self.hook(key.clone()).await
    }

    async fn after(&mut self, key: &HookKey) -> Result<(), MigrationError> {
        self.hook(key.with_phase(HookPhase::After)).await
    }

    async fn hook(&mut self, key: HookKey) -> Result<(), MigrationError> {
        match self.hooks.invoke(&key).await {
            Ok(None) => Ok(()),
            Ok(Some(true)) => {
                debug!(hook = %key, "Hook succeeded");
                self.progress.hooks_run += 1;
                Ok(())
            }
            Ok(Some(false)) => {
                self.progress.hooks_run += 1;
                error!(hook = %key, "Hook reported failure");
                Err(MigrationError::HookFailed { key })
            }
            Err(e) => {
                error!(hook = %key, error = %format!("{:#}", e), "Hook could not run");
                Err(MigrationError::HookFailed { key })
            }
        }
    }
}
