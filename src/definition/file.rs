//! Definition files: the YAML form of a target schema
use anyhow::{Context, Result, bail};
use itertools::Itertools;
use std::path::Path;

use super::{Definition, IndexDef, IndexField};

/// Parse, normalize and validate a definition from YAML text.
pub fn parse_str(contents: &str) -> Result<Definition> {
    let mut definition: Definition =
        serde_yaml::from_str(contents).context("Invalid schema definition")?;
    normalize(&mut definition);
    validate(&definition)?;
    Ok(definition)
}

pub fn parse(path: &Path) -> Result<Definition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema definition: {}", path.display()))?;
    parse_str(&contents).with_context(|| format!("In {}", path.display()))
}

/// Bring a definition into the shape a database reports back.
///
/// Primary key membership follows the primary index: fields flagged `primary` without one get a
/// `{table}_pkey` index, and with one the flags are reset from its fields. Key members and
/// autoincrement fields are NOT NULL.
pub fn normalize(definition: &mut Definition) {
    for table in definition.tables.iter_mut() {
        if table.primary_key().is_none() {
            let columns: Vec<IndexField> = table
                .fields
                .iter()
                .filter(|f| f.primary)
                .map(|f| IndexField::asc(&f.name))
                .collect();
            if !columns.is_empty() {
                let name = format!("{}_pkey", table.name);
                table.indexes.insert(0, IndexDef::primary(&name, columns));
            }
        }

        let key = table.primary_key().cloned();
        for field in table.fields.iter_mut() {
            field.primary = key.as_ref().is_some_and(|k| k.covers_field(&field.name));
            if field.primary || field.autoincrement {
                field.nullable = false;
            }
        }
    }
}

/// Reject definitions that no database could hold: duplicate names, index fields that do not
/// exist, more than one primary key.
pub fn validate(definition: &Definition) -> Result<()> {
    if let Some(name) = definition.tables.iter().map(|t| &t.name).duplicates().next() {
        bail!("Table '{}' is defined more than once", name);
    }

    for table in &definition.tables {
        if table.fields.is_empty() {
            bail!("Table '{}' has no fields", table.name);
        }
        if let Some(name) = table.fields.iter().map(|f| &f.name).duplicates().next() {
            bail!("Field '{}.{}' is defined more than once", table.name, name);
        }
        if let Some(name) = table.indexes.iter().map(|i| &i.name).duplicates().next() {
            bail!("Index '{}' on '{}' is defined more than once", name, table.name);
        }
        if table.indexes.iter().filter(|i| i.primary).count() > 1 {
            bail!("Table '{}' has more than one primary key", table.name);
        }

        for index in &table.indexes {
            if index.fields.is_empty() {
                bail!("Index '{}' on '{}' has no fields", index.name, table.name);
            }
            for column in &index.fields {
                if !table.has_field(&column.field) {
                    bail!(
                        "Index '{}' references unknown field '{}.{}'",
                        index.name,
                        table.name,
                        column.field
                    );
                }
            }
        }
    }

    Ok(())
}
