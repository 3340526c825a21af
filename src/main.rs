use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use pgshift::audit::AuditFilter;
use pgshift::changeset::Timing;
use pgshift::commands::diff::DiffArgs;
use pgshift::commands::run::{RunArgs, RunOutcome};
use pgshift::{commands, config};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = "pgshift.yaml", global = true)]
    config_file: String,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a target definition file with the live database and write the changeset
    Diff {
        /// Target schema definition (YAML)
        #[arg(long)]
        target: PathBuf,

        /// Write the changeset here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Schema name recorded in the changeset and keying its audit entries
        #[arg(long)]
        schema_name: Option<String>,

        /// Version the changeset upgrades to
        #[arg(long)]
        schema_version: Option<String>,

        #[command(flatten)]
        database_args: config::DatabaseArgs,

        #[command(flatten)]
        timing_args: config::TimingArgs,
    },

    /// Edit a saved changeset
    Changeset {
        #[command(subcommand)]
        command: ChangesetCommands,
    },

    /// Verify a changeset against the live database and print its task list
    Verify {
        /// Changeset file
        file: PathBuf,

        /// Print the task lists as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        database_args: config::DatabaseArgs,

        #[command(flatten)]
        timing_args: config::TimingArgs,
    },

    /// Apply a changeset, rolling back every touched table on failure
    Run {
        /// Changeset file
        file: PathBuf,

        /// Run destructive changes without asking
        #[arg(long)]
        yes: bool,

        /// Execute against an in-memory copy of the live schema
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        database_args: config::DatabaseArgs,

        #[command(flatten)]
        timing_args: config::TimingArgs,

        #[command(flatten)]
        backup_args: config::BackupArgs,

        #[command(flatten)]
        hook_args: config::HookArgs,
    },

    /// Show the audit entries recorded for a schema upgrade
    History {
        /// Schema name the entries are keyed by
        schema_name: String,

        /// Only entries of this version
        #[arg(long)]
        schema_version: Option<String>,

        /// Only entries of this timing class
        #[arg(long, value_enum)]
        timing: Option<Timing>,

        /// Print the entries as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        database_args: config::DatabaseArgs,
    },
}

#[derive(Subcommand)]
enum ChangesetCommands {
    /// Record that an added table is a rename of a removed one
    RenameTable {
        file: PathBuf,
        was: String,
        now: String,

        #[command(flatten)]
        database_args: config::DatabaseArgs,
    },

    /// Record that an added field is a rename of a removed one
    RenameField {
        file: PathBuf,
        table: String,
        was: String,
        now: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    let code = tokio::select! {
        result = run_main(cli) => result?,
        _ = wait_for_shutdown_signal() => {
            info!("Received shutdown signal, stopping");
            130
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve(
    file_config: config::ConfigInput,
    cli_config: config::ConfigInput,
) -> Result<config::Config> {
    config::ConfigBuilder::new()
        .with_file(file_config)
        .with_cli_args(cli_config)
        .resolve()
}

/// Returns the process exit code.
async fn run_main(cli: Cli) -> Result<i32> {
    let (file_config, root_dir) = config::load_config(&cli.config_file)?;

    match cli.command {
        Commands::Diff {
            target,
            output,
            schema_name,
            schema_version,
            database_args,
            timing_args,
        } => {
            let config = resolve(
                file_config,
                config::ConfigInput {
                    database: Some(database_args.into()),
                    run: Some(timing_args.into()),
                    ..Default::default()
                },
            )?;

            info!("Comparing target definition with the live database");
            let args = DiffArgs {
                target,
                output,
                schema_name,
                version: schema_version,
            };
            let differs = commands::cmd_diff(&config, &args).await?;
            Ok(if differs { 1 } else { 0 })
        }
        Commands::Changeset { command } => match command {
            ChangesetCommands::RenameTable {
                file,
                was,
                now,
                database_args,
            } => {
                let config = resolve(
                    file_config,
                    config::ConfigInput {
                        database: Some(database_args.into()),
                        ..Default::default()
                    },
                )?;
                commands::cmd_rename_table(&config, &file, &was, &now).await?;
                Ok(0)
            }
            ChangesetCommands::RenameField {
                file,
                table,
                was,
                now,
            } => {
                commands::cmd_rename_field(&file, &table, &was, &now)?;
                Ok(0)
            }
        },
        Commands::Verify {
            file,
            json,
            database_args,
            timing_args,
        } => {
            let config = resolve(
                file_config,
                config::ConfigInput {
                    database: Some(database_args.into()),
                    run: Some(timing_args.into()),
                    ..Default::default()
                },
            )?;

            info!("Verifying changeset");
            let resolved = commands::cmd_verify(&config, &file, json).await?;
            Ok(if resolved { 0 } else { 1 })
        }
        Commands::Run {
            file,
            yes,
            dry_run,
            database_args,
            timing_args,
            backup_args,
            hook_args,
        } => {
            let config = resolve(
                file_config,
                config::ConfigInput {
                    database: Some(database_args.into()),
                    backup: Some(backup_args.into()),
                    hooks: Some(hook_args.into()),
                    run: Some(timing_args.into()),
                    audit: None,
                },
            )?;

            info!("Running changeset");
            let outcome: RunOutcome = commands::cmd_run(
                &config,
                &root_dir,
                &RunArgs {
                    changeset: file,
                    yes,
                    dry_run,
                    verbose: cli.verbose || cli.debug,
                },
            )
            .await?;
            Ok(outcome.exit_code())
        }
        Commands::History {
            schema_name,
            schema_version,
            timing,
            json,
            database_args,
        } => {
            let config = resolve(
                file_config,
                config::ConfigInput {
                    database: Some(database_args.into()),
                    ..Default::default()
                },
            )?;

            let filter = AuditFilter {
                schema_name,
                version: schema_version,
                timing,
            };
            let found = commands::cmd_history(&config, &filter, json).await?;
            Ok(if found { 0 } else { 1 })
        }
    }
}
