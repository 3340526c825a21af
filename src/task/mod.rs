//! Task lists: verified, executable units of work.
//!
//! A task list is built from one changeset partition and the live database (see [`verify`]).
//! Tasks are grouped by object kind and operation. Each task names its object, its owning table
//! and field where those apply, and carries the payload the executor needs ("cargo"), so the
//! executor never diffs again.

use serde::Serialize;
use std::fmt;

use crate::definition::{FieldDef, IndexDef};

pub mod verify;

pub use verify::{build, verify};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task<C> {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub cargo: C,
}

impl<C> Task<C> {
    pub fn table(name: &str, cargo: C) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            field: None,
            cargo,
        }
    }

    pub fn field(table: &str, field: &str, cargo: C) -> Self {
        Self {
            name: field.to_string(),
            table: Some(table.to_string()),
            field: Some(field.to_string()),
            cargo,
        }
    }

    pub fn index(table: &str, index: &str, cargo: C) -> Self {
        Self {
            name: index.to_string(),
            table: Some(table.to_string()),
            field: None,
            cargo,
        }
    }

    /// The owning table for field and index tasks, the task's own name for table tasks.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

/// Payload for creating a table. Index tasks are nested: they run once the table exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCargo {
    pub fields: Vec<FieldDef>,
    pub indexes: Vec<Task<IndexDef>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameCargo {
    pub was: String,
}

/// Payload for renaming a field. `alter` is set when the renamed field must also be altered to
/// match `field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRenameCargo {
    pub was: String,
    pub field: FieldDef,
    pub alter: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableTasks {
    pub add: Vec<Task<TableCargo>>,
    pub remove: Vec<Task<()>>,
    pub rename: Vec<Task<RenameCargo>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldTasks {
    pub add: Vec<Task<FieldDef>>,
    pub change: Vec<Task<FieldDef>>,
    pub remove: Vec<Task<()>>,
    pub rename: Vec<Task<FieldRenameCargo>>,
}

/// Index removal carries the live definition: dropping a primary key differs from dropping an
/// index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexTasks {
    pub add: Vec<Task<IndexDef>>,
    pub remove: Vec<Task<IndexDef>>,
}

/// A changeset entry that contradicts the live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub action: String,
    pub object: String,
    pub reason: String,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.action, self.object, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskList {
    pub tables: TableTasks,
    pub fields: FieldTasks,
    pub indexes: IndexTasks,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<Unresolved>,
}

impl TaskList {
    /// True when every changeset entry could be checked against the live database.
    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.add.len()
            + self
                .tables
                .add
                .iter()
                .map(|t| t.cargo.indexes.len())
                .sum::<usize>()
            + self.tables.remove.len()
            + self.tables.rename.len()
            + self.fields.add.len()
            + self.fields.change.len()
            + self.fields.remove.len()
            + self.fields.rename.len()
            + self.indexes.add.len()
            + self.indexes.remove.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One line per task, in execution order.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.len());

        for task in &self.indexes.remove {
            lines.push(format!(
                "remove {} {}.{}",
                task.cargo.kind(),
                task.table_name(),
                task.name
            ));
        }
        for task in &self.tables.remove {
            lines.push(format!("remove table {}", task.name));
        }
        for task in &self.tables.rename {
            lines.push(format!("rename table {} -> {}", task.cargo.was, task.name));
        }
        for task in &self.fields.rename {
            lines.push(format!(
                "rename field {}.{} -> {}",
                task.table_name(),
                task.cargo.was,
                task.name
            ));
        }
        for task in &self.fields.add {
            lines.push(format!(
                "add field {}.{} {}",
                task.table_name(),
                task.name,
                task.cargo.sql_type()
            ));
        }
        for task in &self.fields.change {
            lines.push(format!(
                "alter field {}.{} {}",
                task.table_name(),
                task.name,
                task.cargo.sql_type()
            ));
        }
        for task in &self.fields.remove {
            lines.push(format!("remove field {}.{}", task.table_name(), task.name));
        }
        for task in &self.indexes.add {
            lines.push(format!(
                "add {} {}.{}",
                task.cargo.kind(),
                task.table_name(),
                task.name
            ));
        }
        for task in &self.tables.add {
            lines.push(format!(
                "add table {} ({} fields)",
                task.name,
                task.cargo.fields.len()
            ));
            for index in &task.cargo.indexes {
                lines.push(format!(
                    "  add {} {}.{}",
                    index.cargo.kind(),
                    task.name,
                    index.name
                ));
            }
        }

        lines
    }
}
