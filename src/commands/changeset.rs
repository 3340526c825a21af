//! pgshift changeset - explicit edits of a saved changeset
//!
//! Edits rewrite the file in place. Loading and saving both go through the checksummed YAML
//! form, so the checksum recorded by the next run reflects the edit.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::changeset::edit;
use crate::changeset::io::{self, DumpOptions};
use crate::config::Config;
use crate::definition;

/// Turn an add/remove pair of tables into a rename. The old table's structure is read from the
/// live database so that any differences are kept as changes of the renamed table.
pub async fn cmd_rename_table(config: &Config, file: &Path, was: &str, now: &str) -> Result<()> {
    let loaded = io::load(file)?;

    let (_pool, mut driver) = super::open_driver(config).await?;
    let current = definition::load_live(&mut driver, Some(&[was.to_string()])).await?;

    let edited = edit::rename_table(&loaded.changeset, was, now, &current)?;
    io::save(file, &edited, DumpOptions::default())?;

    info!(was, now, "Recorded table rename");
    println!("✅ {} is now a rename of {} in {}", now, was, file.display());
    Ok(())
}

pub fn cmd_rename_field(file: &Path, table: &str, was: &str, now: &str) -> Result<()> {
    let loaded = io::load(file)?;

    let edited = edit::rename_field(&loaded.changeset, table, was, now)?;
    io::save(file, &edited, DumpOptions::default())?;

    info!(table, was, now, "Recorded field rename");
    println!(
        "✅ {}.{} is now a rename of {}.{} in {}",
        table,
        now,
        table,
        was,
        file.display()
    );
    Ok(())
}
