//! Changesets: the structural difference between two schema definitions.
//!
//! A changeset is split into a `constructive` partition (additive or widening changes) and a
//! `destructive` partition (removals and narrowing changes that risk data loss). Each partition
//! lists table additions, removals, renames and per-table changes; per-table changes nest field
//! and index changes.
//!
//! Renames are never inferred. They only appear after an explicit edit (see [`edit`]).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::definition::{FieldDef, IndexDef, TableDef};

pub mod edit;
pub mod io;

/// The timing class of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    Constructive,
    Destructive,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timing::Constructive => write!(f, "constructive"),
            Timing::Destructive => write!(f, "destructive"),
        }
    }
}

impl std::str::FromStr for Timing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constructive" => Ok(Timing::Constructive),
            "destructive" => Ok(Timing::Destructive),
            other => Err(format!("unknown timing class '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    /// Name of the schema being upgraded. Audit entries of every run are keyed by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    /// Version the changeset upgrades the schema to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub constructive: Partition,
    #[serde(default)]
    pub destructive: Partition,
}

impl Changeset {
    pub fn partition(&self, timing: Timing) -> &Partition {
        match timing {
            Timing::Constructive => &self.constructive,
            Timing::Destructive => &self.destructive,
        }
    }

    pub fn partition_mut(&mut self, timing: Timing) -> &mut Partition {
        match timing {
            Timing::Constructive => &mut self.constructive,
            Timing::Destructive => &mut self.destructive,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.constructive.is_empty() && self.destructive.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    #[serde(default)]
    pub tables: TableChanges,
}

impl Partition {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables that exist before the run and are mutated or dropped by it.
    ///
    /// Changed tables are reported under their pre-rename name. Added tables are excluded: they
    /// have nothing to back up.
    pub fn affected_tables(&self) -> Vec<String> {
        let mut affected = BTreeSet::new();

        affected.extend(self.tables.remove.iter().cloned());
        affected.extend(self.tables.rename.iter().map(|r| r.was.clone()));

        for (name, change) in &self.tables.change {
            if change.is_empty() {
                continue;
            }
            affected.insert(self.tables.original_name(name).to_string());
        }

        affected.into_iter().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<TableDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub change: BTreeMap<String, TableChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rename: Vec<TableRename>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.remove.is_empty()
            && self.rename.is_empty()
            && self.change.values().all(TableChange::is_empty)
    }

    /// The name a table had before this changeset renamed it.
    pub fn original_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.rename
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.was.as_str())
            .unwrap_or(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRename {
    pub name: String,
    pub was: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChange {
    #[serde(default)]
    pub fields: FieldChanges,
    #[serde(default)]
    pub indexes: IndexChanges,
}

impl TableChange {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.indexes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rename: Vec<FieldRename>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.change.is_empty() && self.rename.is_empty()
    }
}

/// A field rename. `field` is the complete definition under the new name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
    pub was: String,
    pub field: FieldDef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<IndexDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change: Vec<IndexDef>,
}

impl IndexChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.change.is_empty()
    }
}
