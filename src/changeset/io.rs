//! Persisted changesets.
//!
//! Changesets are stored as YAML so an operator can review and hand-edit them (for example to
//! resolve a rename) before a run executes.

use anyhow::{Context, Result};
use std::path::Path;

use super::{Changeset, Timing};

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Keep only one partition; `None` dumps both.
    pub timing: Option<Timing>,
}

/// A changeset read from disk together with the checksum of the text it was parsed from.
#[derive(Debug, Clone)]
pub struct LoadedChangeset {
    pub changeset: Changeset,
    pub checksum: String,
}

pub fn checksum(contents: &str) -> String {
    format!("{:x}", md5::compute(contents))
}

pub fn dump(changeset: &Changeset, options: DumpOptions) -> Result<String> {
    let selected = match options.timing {
        None => changeset.clone(),
        Some(timing) => {
            let mut only = Changeset {
                schema_name: changeset.schema_name.clone(),
                version: changeset.version.clone(),
                ..Changeset::default()
            };
            *only.partition_mut(timing) = changeset.partition(timing).clone();
            only
        }
    };

    serde_yaml::to_string(&selected).context("Failed to serialize changeset")
}

pub fn save(path: &Path, changeset: &Changeset, options: DumpOptions) -> Result<()> {
    let contents = dump(changeset, options)?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write changeset: {}", path.display()))
}

pub fn load_str(contents: &str) -> Result<LoadedChangeset> {
    let changeset: Changeset = serde_yaml::from_str(contents).context("Invalid changeset")?;
    Ok(LoadedChangeset {
        changeset,
        checksum: checksum(contents),
    })
}

pub fn load(path: &Path) -> Result<LoadedChangeset> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read changeset: {}", path.display()))?;
    load_str(&contents).with_context(|| format!("In {}", path.display()))
}
