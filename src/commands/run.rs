//! pgshift run - apply a changeset to the live database
//!
//! Each selected timing class is its own orchestrated run, constructive first. A failed run is
//! rolled back on its own; runs that already committed stay committed.

use anyhow::{Result, bail};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::audit::{AuditLog, PgAuditLog, TracingAudit};
use crate::changeset::{Changeset, Timing};
use crate::changeset::io::{self, LoadedChangeset};
use crate::config::Config;
use crate::constants::DEFAULT_SCHEMA_NAME;
use crate::definition;
use crate::driver::{Driver, MemoryDriver};
use crate::error::MigrationError;
use crate::hooks::{HookProvider, NoHooks, ScriptHooks};
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::progress::RunReporter;
use crate::prompts::{self, Approval};
use crate::task;

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub changeset: PathBuf,
    pub yes: bool,
    pub dry_run: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Committed,
    /// The operator declined the destructive run
    Declined,
    RolledBack,
    /// Rollback itself failed: the database needs manual attention
    RollbackFailed,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Committed | RunOutcome::Declined => 0,
            RunOutcome::RolledBack => 1,
            RunOutcome::RollbackFailed => 2,
        }
    }
}

struct RunContext<'a> {
    config: &'a Config,
    loaded: &'a LoadedChangeset,
    args: &'a RunArgs,
    reporter: RunReporter,
}

pub async fn cmd_run(config: &Config, root_dir: &Path, args: &RunArgs) -> Result<RunOutcome> {
    let loaded = io::load(&args.changeset)?;
    let started = Instant::now();
    info!(
        changeset = %args.changeset.display(),
        checksum = %loaded.checksum,
        "Loaded changeset"
    );

    let (pool, mut pg) = super::open_driver(config).await?;
    let mut ctx = RunContext {
        config,
        loaded: &loaded,
        args,
        reporter: RunReporter::new(config.run.timing.classes().len(), args.verbose),
    };

    let outcome = if args.dry_run {
        // the copy has no rows, so this checks structure and ordering only
        let names = super::managed_tables(config, pg.table_names().await?);
        let live = definition::load_live(&mut pg, Some(&names)).await?;
        let mut driver = MemoryDriver::from_definition(&live);
        println!("Dry run: executing against an in-memory copy of the live schema");
        run_classes(&mut driver, &mut NoHooks, &mut TracingAudit, &mut ctx).await?
    } else {
        let mut hooks = ScriptHooks::discover(&root_dir.join(&config.hooks.dir))?
            .with_env("DATABASE_URL", &config.database.url)
            .with_env("PGSHIFT_SCHEMA", &config.database.schema)
            .with_env("PGSHIFT_PREFIX", &config.database.prefix);

        if config.audit.enabled {
            let mut audit = PgAuditLog::new(pool.clone(), config.audit.table.clone());
            run_classes(&mut pg, &mut hooks, &mut audit, &mut ctx).await?
        } else {
            run_classes(&mut pg, &mut hooks, &mut TracingAudit, &mut ctx).await?
        }
    };

    if outcome == RunOutcome::Committed {
        ctx.reporter.summary(started.elapsed());
    }
    Ok(outcome)
}

async fn run_classes<D: Driver, H: HookProvider, A: AuditLog>(
    driver: &mut D,
    hooks: &mut H,
    audit: &mut A,
    ctx: &mut RunContext<'_>,
) -> Result<RunOutcome> {
    let changeset = &ctx.loaded.changeset;

    for timing in ctx.config.run.timing.classes() {
        let partition = changeset.partition(timing);
        if partition.is_empty() {
            ctx.reporter.skip_run(timing);
            continue;
        }

        let (preview, _) = task::build(partition, driver).await?;
        ctx.reporter.start_run(timing, &preview);

        if timing == Timing::Destructive && preview.is_resolved() && !preview.is_empty() {
            let approval = Approval::select(
                ctx.args.yes,
                ctx.args.dry_run,
                std::io::stdin().is_terminal(),
            );
            match approval {
                Approval::Granted => {}
                Approval::Prompt => {
                    if !prompts::confirm_destructive(&preview)? {
                        println!("Destructive run cancelled");
                        return Ok(RunOutcome::Declined);
                    }
                }
                Approval::Refused => {
                    bail!("Destructive changes need confirmation: re-run with --yes");
                }
            }
        }

        let options = RunOptions {
            timing,
            backup: ctx.config.backup.enabled,
            backup_suffix: ctx.config.backup.suffix.clone(),
            checksum: Some(ctx.loaded.checksum.clone()),
            schema_name: schema_name(changeset, &ctx.args.changeset),
            version: changeset.version.clone(),
        };
        if !options.backup {
            warn!(%timing, "Backups are disabled: a failed run cannot restore changed tables");
        }

        let started = Instant::now();
        let orchestrator = Orchestrator::new(&mut *driver, &mut *hooks, &mut *audit, options);
        match orchestrator.run(changeset).await {
            Ok(report) if report.committed() => {
                ctx.reporter.committed(&report, started.elapsed());
            }
            Ok(report) => {
                ctx.reporter.rolled_back(&report);
                return Ok(RunOutcome::RolledBack);
            }
            Err(e @ MigrationError::RollbackFailed { .. }) => {
                ctx.reporter.rollback_failed(&e);
                return Ok(RunOutcome::RollbackFailed);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(RunOutcome::Committed)
}

/// The changeset's own schema name, else the name of its file.
fn schema_name(changeset: &Changeset, path: &Path) -> String {
    changeset
        .schema_name
        .clone()
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_SCHEMA_NAME.to_string())
}
