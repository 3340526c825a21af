//! Compare two definitions into a changeset.
//!
//! Objects are matched by name only, so a renamed table or field shows up as an add plus a
//! remove. Turning such a pair into a rename is an explicit edit, see `changeset::edit`.

use tracing::debug;

use super::{Definition, FieldDef, IndexDef, TableDef};
use crate::changeset::{Changeset, TableChange};

pub fn compare(target: &Definition, current: &Definition) -> Changeset {
    let mut changeset = Changeset::default();

    for table in &target.tables {
        match current.table(&table.name) {
            None => changeset.constructive.tables.add.push(table.clone()),
            Some(old) => diff_table(old, table, &mut changeset),
        }
    }

    for table in &current.tables {
        if !target.contains_table(&table.name) {
            changeset.destructive.tables.remove.push(table.name.clone());
        }
    }

    debug!(
        added = changeset.constructive.tables.add.len(),
        removed = changeset.destructive.tables.remove.len(),
        "Compared definitions"
    );
    changeset
}

/// Record the differences between two versions of one table under `new.name`.
pub fn diff_table(old: &TableDef, new: &TableDef, changeset: &mut Changeset) {
    let mut constructive = TableChange::default();
    let mut destructive = TableChange::default();

    for field in &new.fields {
        match old.field(&field.name) {
            None => constructive.fields.add.push(field.clone()),
            Some(existing) if existing == field => {}
            Some(existing) if narrows(existing, field) => {
                destructive.fields.change.push(field.clone())
            }
            Some(_) => constructive.fields.change.push(field.clone()),
        }
    }

    for field in &old.fields {
        if !new.has_field(&field.name) {
            destructive.fields.remove.push(field.name.clone());
        }
    }

    for index in &new.indexes {
        match old.index(&index.name) {
            None => constructive.indexes.add.push(index.clone()),
            Some(existing) if existing == index => {}
            Some(existing) if restricts(existing, index) => {
                destructive.indexes.change.push(index.clone())
            }
            Some(_) => constructive.indexes.change.push(index.clone()),
        }
    }

    for index in &old.indexes {
        if new.index(&index.name).is_none() {
            destructive.indexes.remove.push(index.name.clone());
        }
    }

    if !constructive.is_empty() {
        changeset
            .constructive
            .tables
            .change
            .insert(new.name.clone(), constructive);
    }
    if !destructive.is_empty() {
        changeset
            .destructive
            .tables
            .change
            .insert(new.name.clone(), destructive);
    }
}

/// A field change narrows when existing data may no longer fit the new definition.
pub fn narrows(old: &FieldDef, new: &FieldDef) -> bool {
    if old.data_type != new.data_type {
        return true;
    }

    let shorter = match (old.length, new.length) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(was), Some(now)) => now < was,
    };

    shorter
        || (old.nullable && !new.nullable)
        || (old.autoincrement && !new.autoincrement)
        || old.primary != new.primary
}

/// An index change restricts when rows that satisfied the old index could violate the new one.
pub fn restricts(old: &IndexDef, new: &IndexDef) -> bool {
    (new.unique && !old.unique) || (new.primary && !old.primary)
}
