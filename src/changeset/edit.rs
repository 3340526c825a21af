//! Explicit changeset edits.
//!
//! Diffing matches objects by name, so it reports a rename as an add plus a remove. These edits
//! turn such a pair into a rename. Each is a pure transformation: the input is left untouched.

use anyhow::{Result, anyhow, bail};

use super::{Changeset, FieldRename, TableRename};
use crate::definition::Definition;
use crate::definition::compare::diff_table;

/// Convert `tables.add[now]` + `tables.remove[was]` into `tables.rename {now, was}`.
///
/// `current` supplies the definition of `was`, so that any structural difference between the
/// old table and the added one is kept as per-table changes under `now`.
pub fn rename_table(
    changeset: &Changeset,
    was: &str,
    now: &str,
    current: &Definition,
) -> Result<Changeset> {
    let mut edited = changeset.clone();

    let added = edited
        .constructive
        .tables
        .add
        .iter()
        .position(|t| t.name == now)
        .ok_or_else(|| anyhow!("No added table '{}' to rename into", now))?;
    let removed = edited
        .destructive
        .tables
        .remove
        .iter()
        .position(|t| t == was)
        .ok_or_else(|| anyhow!("No removed table '{}' to rename from", was))?;
    let old = current
        .table(was)
        .ok_or_else(|| anyhow!("Table '{}' is not part of the current definition", was))?;

    let new = edited.constructive.tables.add.remove(added);
    edited.destructive.tables.remove.remove(removed);

    edited.constructive.tables.rename.push(TableRename {
        name: now.to_string(),
        was: was.to_string(),
    });
    diff_table(old, &new, &mut edited);

    Ok(edited)
}

/// Convert `fields.add[now]` + `fields.remove[was]` on one table into `fields.rename`.
pub fn rename_field(changeset: &Changeset, table: &str, was: &str, now: &str) -> Result<Changeset> {
    let mut edited = changeset.clone();

    let field = {
        let Some(change) = edited.constructive.tables.change.get_mut(table) else {
            bail!("No constructive changes recorded for table '{}'", table);
        };
        let position = change
            .fields
            .add
            .iter()
            .position(|f| f.name == now)
            .ok_or_else(|| anyhow!("No added field '{}.{}' to rename into", table, now))?;
        change.fields.add.remove(position)
    };

    {
        let Some(change) = edited.destructive.tables.change.get_mut(table) else {
            bail!("No destructive changes recorded for table '{}'", table);
        };
        let position = change
            .fields
            .remove
            .iter()
            .position(|f| f == was)
            .ok_or_else(|| anyhow!("No removed field '{}.{}' to rename from", table, was))?;
        change.fields.remove.remove(position);
    }

    if let Some(change) = edited.constructive.tables.change.get_mut(table) {
        change.fields.rename.push(FieldRename {
            was: was.to_string(),
            field,
        });
    }

    edited.destructive.tables.change.retain(|_, c| !c.is_empty());

    Ok(edited)
}
