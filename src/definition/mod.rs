//! In-memory schema definitions: a tree of tables with their fields and indexes.
//!
//! A `Definition` is an immutable snapshot. One describes the target schema (parsed from a
//! definition file), another the live database (loaded through a driver).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::Driver;

pub mod compare;
pub mod file;
pub mod index;
pub mod table;

pub use index::{IndexDef, IndexField, IndexKind, SortDirection};
pub use table::{FieldDef, IndexNames, TableDef};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

impl Definition {
    pub fn new(tables: Vec<TableDef>) -> Self {
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}

/// Load the live definition of the given tables, or of every table when `names` is `None`.
///
/// Tables that do not exist are simply absent from the result.
pub async fn load_live<D: Driver>(driver: &mut D, names: Option<&[String]>) -> Result<Definition> {
    let names = match names {
        Some(names) => names.to_vec(),
        None => driver
            .table_names()
            .await
            .context("Failed to list live tables")?,
    };

    let mut tables = Vec::with_capacity(names.len());
    for name in &names {
        if let Some(table) = driver
            .describe_table(name)
            .await
            .with_context(|| format!("Failed to describe table '{}'", name))?
        {
            tables.push(table);
        }
    }

    debug!(
        requested = names.len(),
        found = tables.len(),
        "Loaded live definition"
    );
    Ok(Definition { tables })
}
