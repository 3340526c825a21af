//! pgshift verify - check a changeset against the live database without changing anything

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::changeset::Timing;
use crate::changeset::io;
use crate::config::Config;
use crate::progress::RunReporter;
use crate::task::{self, TaskList};

#[derive(Debug, Serialize)]
struct VerifiedClass {
    timing: Timing,
    tasks: TaskList,
}

/// Print the verified task list of every selected timing class.
///
/// Returns false when any entry contradicts the live database.
pub async fn cmd_verify(config: &Config, file: &Path, json: bool) -> Result<bool> {
    let loaded = io::load(file)?;
    let (_pool, mut driver) = super::open_driver(config).await?;

    let mut verified = Vec::new();
    for timing in config.run.timing.classes() {
        let (tasks, _) = task::build(loaded.changeset.partition(timing), &mut driver).await?;
        verified.push(VerifiedClass { timing, tasks });
    }

    let resolved = verified.iter().all(|v| v.tasks.is_resolved());

    if json {
        println!("{}", serde_json::to_string_pretty(&verified)?);
        return Ok(resolved);
    }

    let mut reporter = RunReporter::new(verified.len(), false);
    for class in &verified {
        reporter.start_run(class.timing, &class.tasks);
        reporter.task_list(&class.tasks);
    }

    if resolved {
        println!("✅ Changeset {} verifies against the live database", file.display());
    } else {
        println!("❌ Changeset {} does not match the live database", file.display());
    }
    Ok(resolved)
}
