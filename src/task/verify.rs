//! Build a task list by checking a changeset partition against the live database.
//!
//! Changesets may be authored long before they run and the database may have drifted since, so
//! every entry is checked again here. Entries that are already applied become no-ops; entries
//! that contradict reality are recorded as unresolved rather than raised.

use anyhow::Result;
use std::collections::BTreeSet;
use tracing::debug;

use super::{FieldRenameCargo, RenameCargo, TableCargo, Task, TaskList, Unresolved};
use crate::changeset::{Partition, TableChange};
use crate::definition::{self, Definition, TableDef};
use crate::driver::Driver;

/// Load the live definition of every table the partition mentions, then verify against it.
pub async fn build<D: Driver>(
    partition: &Partition,
    driver: &mut D,
) -> Result<(TaskList, Definition)> {
    let names = referenced_tables(partition);
    let live = definition::load_live(driver, Some(&names)).await?;
    let tasks = verify(partition, &live);
    Ok((tasks, live))
}

fn referenced_tables(partition: &Partition) -> Vec<String> {
    let tables = &partition.tables;
    let mut names = BTreeSet::new();

    names.extend(tables.add.iter().map(|t| t.name.clone()));
    names.extend(tables.remove.iter().cloned());
    for rename in &tables.rename {
        names.insert(rename.name.clone());
        names.insert(rename.was.clone());
    }
    for name in tables.change.keys() {
        names.insert(name.clone());
        names.insert(tables.original_name(name).to_string());
    }

    names.into_iter().collect()
}

/// Verify a partition against a live definition. Pure and deterministic: the same inputs always
/// produce the same task list.
pub fn verify(partition: &Partition, live: &Definition) -> TaskList {
    let mut tasks = TaskList::default();
    let tables = &partition.tables;

    for table in &tables.add {
        if live.contains_table(&table.name) {
            unresolved(&mut tasks, "add table", &table.name, "table already exists");
            continue;
        }

        let indexes = table
            .indexes
            .iter()
            .map(|index| Task::index(&table.name, &index.name, index.clone()))
            .collect();
        tasks.tables.add.push(Task::table(
            &table.name,
            TableCargo {
                fields: table.fields.clone(),
                indexes,
            },
        ));
    }

    for name in &tables.remove {
        if live.contains_table(name) {
            tasks.tables.remove.push(Task::table(name, ()));
        } else {
            debug!(table = %name, "Table already removed, skipping");
        }
    }

    for rename in &tables.rename {
        match (
            live.contains_table(&rename.was),
            live.contains_table(&rename.name),
        ) {
            (true, false) => tasks.tables.rename.push(Task::table(
                &rename.name,
                RenameCargo {
                    was: rename.was.clone(),
                },
            )),
            (false, true) => {
                debug!(was = %rename.was, now = %rename.name, "Table already renamed, skipping")
            }
            (true, true) => unresolved(
                &mut tasks,
                "rename table",
                &rename.was,
                &format!("target name '{}' already exists", rename.name),
            ),
            (false, false) => unresolved(
                &mut tasks,
                "rename table",
                &rename.was,
                "table does not exist",
            ),
        }
    }

    for (name, change) in &tables.change {
        if change.is_empty() {
            continue;
        }

        let live_table = live
            .table(tables.original_name(name))
            .or_else(|| live.table(name));
        match live_table {
            Some(live_table) => verify_table_change(&mut tasks, name, change, live_table),
            None => unresolved(&mut tasks, "alter table", name, "table does not exist"),
        }
    }

    tasks
}

/// `table` is the name the table has once renames ran; `live` is its current definition, which
/// may still be under its pre-rename name. Index removals run before renames, so they address
/// the table by `live.name`.
fn verify_table_change(tasks: &mut TaskList, table: &str, change: &TableChange, live: &TableDef) {
    let fields = &change.fields;

    for rename in &fields.rename {
        let now = &rename.field.name;
        match (live.field(&rename.was), live.has_field(now)) {
            (Some(existing), false) => tasks.fields.rename.push(Task::field(
                table,
                now,
                FieldRenameCargo {
                    was: rename.was.clone(),
                    field: rename.field.clone(),
                    alter: existing.renamed(now) != rename.field,
                },
            )),
            (None, true) => {
                debug!(table, was = %rename.was, now = %now, "Field already renamed, skipping")
            }
            (Some(_), true) => unresolved(
                tasks,
                "rename field",
                &format!("{}.{}", table, rename.was),
                &format!("target name '{}' already exists", now),
            ),
            (None, false) => unresolved(
                tasks,
                "rename field",
                &format!("{}.{}", table, rename.was),
                "field does not exist",
            ),
        }
    }

    for field in &fields.add {
        match live.field(&field.name) {
            None => tasks.fields.add.push(Task::field(table, &field.name, field.clone())),
            Some(existing) if existing == field => {
                debug!(table, field = %field.name, "Field already added, skipping")
            }
            Some(_) => unresolved(
                tasks,
                "add field",
                &format!("{}.{}", table, field.name),
                "a different field with this name exists",
            ),
        }
    }

    for field in &fields.change {
        let live_name = fields
            .rename
            .iter()
            .find(|r| r.field.name == field.name)
            .map(|r| r.was.as_str())
            .filter(|was| live.has_field(was))
            .unwrap_or(&field.name);

        match live.field(live_name) {
            Some(existing) if existing.renamed(&field.name) == *field => {
                debug!(table, field = %field.name, "Field already matches, skipping")
            }
            Some(_) => tasks
                .fields
                .change
                .push(Task::field(table, &field.name, field.clone())),
            None => unresolved(
                tasks,
                "alter field",
                &format!("{}.{}", table, field.name),
                "field does not exist",
            ),
        }
    }

    for name in &fields.remove {
        if live.has_field(name) {
            tasks.fields.remove.push(Task::field(table, name, ()));
        } else {
            debug!(table, field = %name, "Field already removed, skipping");
        }
    }

    let indexes = &change.indexes;

    for name in &indexes.remove {
        match live.index(name) {
            Some(existing) => tasks
                .indexes
                .remove
                .push(Task::index(&live.name, name, existing.clone())),
            None => debug!(table, index = %name, "Index already removed, skipping"),
        }
    }

    for index in &indexes.change {
        match live.index(&index.name) {
            Some(existing) if existing == index => {
                debug!(table, index = %index.name, "Index already matches, skipping")
            }
            Some(existing) => {
                tasks
                    .indexes
                    .remove
                    .push(Task::index(&live.name, &index.name, existing.clone()));
                tasks
                    .indexes
                    .add
                    .push(Task::index(table, &index.name, index.clone()));
            }
            None => tasks
                .indexes
                .add
                .push(Task::index(table, &index.name, index.clone())),
        }
    }

    for index in &indexes.add {
        match live.index(&index.name) {
            None => tasks
                .indexes
                .add
                .push(Task::index(table, &index.name, index.clone())),
            Some(existing) if existing == index => {
                debug!(table, index = %index.name, "Index already added, skipping")
            }
            Some(_) => unresolved(
                tasks,
                "add index",
                &format!("{}.{}", table, index.name),
                "a different index with this name exists",
            ),
        }
    }
}

fn unresolved(tasks: &mut TaskList, action: &str, object: &str, reason: &str) {
    debug!(action, object, reason, "Unresolved task");
    tasks.unresolved.push(Unresolved {
        action: action.to_string(),
        object: object.to_string(),
        reason: reason.to_string(),
    });
}
