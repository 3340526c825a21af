//! pgshift diff - compare a target definition file with the live database
//!
//! Writes the changeset that would bring the live database to the target. Renames are never
//! guessed: review the output and resolve them with `pgshift changeset`.

use anyhow::Result;
use std::path::PathBuf;

use crate::changeset::io::{self, DumpOptions};
use crate::changeset::{Changeset, Timing};
use crate::config::Config;
use crate::definition::{self, compare, file};
use crate::driver::Driver;

#[derive(Debug, Clone)]
pub struct DiffArgs {
    pub target: PathBuf,
    pub output: Option<PathBuf>,
    /// Schema name and version written into the changeset header
    pub schema_name: Option<String>,
    pub version: Option<String>,
}

/// Returns true when the live database differs from the target.
pub async fn cmd_diff(config: &Config, args: &DiffArgs) -> Result<bool> {
    eprintln!("Loading target definition...");
    let target = file::parse(&args.target)?;

    eprintln!("Loading live database...");
    let (_pool, mut driver) = super::open_driver(config).await?;
    let names = super::managed_tables(config, driver.table_names().await?);
    let live = definition::load_live(&mut driver, Some(&names)).await?;

    let mut changeset = compare::compare(&target, &live);
    changeset.schema_name = args.schema_name.clone();
    changeset.version = args.version.clone();
    let options = DumpOptions {
        timing: config.run.timing.single(),
    };

    match &args.output {
        Some(path) => {
            io::save(path, &changeset, options)?;
            eprintln!("Changeset written to {}", path.display());
        }
        None => print!("{}", io::dump(&changeset, options)?),
    }

    print_counts(&changeset);
    Ok(!changeset.is_empty())
}

fn print_counts(changeset: &Changeset) {
    if changeset.is_empty() {
        eprintln!("No differences found");
        return;
    }

    for timing in [Timing::Constructive, Timing::Destructive] {
        let tables = &changeset.partition(timing).tables;
        let changed = tables.change.values().filter(|c| !c.is_empty()).count();
        eprintln!(
            "{}: {} added, {} removed, {} changed table(s)",
            timing,
            tables.add.len(),
            tables.remove.len(),
            changed
        );
    }

    if !changeset.constructive.tables.add.is_empty() && !changeset.destructive.tables.remove.is_empty() {
        eprintln!("Tables were both added and removed: if any of them is a rename, resolve it with `pgshift changeset rename-table`");
    }
}
