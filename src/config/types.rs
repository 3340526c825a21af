use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::changeset::Timing;

/// Raw configuration input - all fields Optional for merging
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigInput {
    pub database: Option<DatabaseInput>,
    pub backup: Option<BackupInput>,
    pub hooks: Option<HooksInput>,
    pub audit: Option<AuditInput>,
    pub run: Option<RunInput>,
}

/// Resolved configuration with all defaults applied
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: Database,
    pub backup: Backup,
    pub hooks: Hooks,
    pub audit: Audit,
    pub run: Run,
}

// Database configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseInput {
    pub url: Option<String>,
    pub schema: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub schema: String,
    /// Prefix of every managed table name; definitions use the bare names
    pub prefix: String,
}

// Backup configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackupInput {
    pub enabled: Option<bool>,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Backup {
    pub enabled: bool,
    pub suffix: String,
}

// Hook configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HooksInput {
    pub dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Hooks {
    pub dir: String,
}

// Audit configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditInput {
    pub enabled: Option<bool>,
    pub table: Option<TrackingTableInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackingTableInput {
    pub schema: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Audit {
    pub enabled: bool,
    pub table: TrackingTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTable {
    pub schema: String,
    pub name: String,
}

// Run configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunInput {
    pub timing: Option<TimingSelection>,
}

#[derive(Debug, Clone, Default)]
pub struct Run {
    pub timing: TimingSelection,
}

/// Which timing classes a command covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimingSelection {
    Constructive,
    Destructive,
    /// Constructive first, then destructive
    #[default]
    All,
}

impl TimingSelection {
    /// Timing classes in execution order
    pub fn classes(self) -> Vec<Timing> {
        match self {
            TimingSelection::Constructive => vec![Timing::Constructive],
            TimingSelection::Destructive => vec![Timing::Destructive],
            TimingSelection::All => vec![Timing::Constructive, Timing::Destructive],
        }
    }

    pub fn single(self) -> Option<Timing> {
        match self {
            TimingSelection::Constructive => Some(Timing::Constructive),
            TimingSelection::Destructive => Some(Timing::Destructive),
            TimingSelection::All => None,
        }
    }
}

// CLI argument groups for command-specific options
#[derive(Debug, Clone, Default, Args)]
pub struct DatabaseArgs {
    #[arg(long, help = "Database URL (falls back to DATABASE_URL)")]
    pub database_url: Option<String>,

    #[arg(long, help = "Schema holding the managed tables")]
    pub schema: Option<String>,

    #[arg(long, help = "Prefix of the managed table names")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct TimingArgs {
    #[arg(long, value_enum, help = "Timing class to cover")]
    pub timing: Option<TimingSelection>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BackupArgs {
    #[arg(long, help = "Skip table backups (the decision is still audited)")]
    pub no_backup: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct HookArgs {
    #[arg(long, help = "Hooks directory path")]
    pub hooks_dir: Option<String>,
}

// Conversion functions from CLI args to config input
impl From<DatabaseArgs> for DatabaseInput {
    fn from(args: DatabaseArgs) -> Self {
        Self {
            url: args.database_url,
            schema: args.schema,
            prefix: args.prefix,
        }
    }
}

impl From<TimingArgs> for RunInput {
    fn from(args: TimingArgs) -> Self {
        Self {
            timing: args.timing,
        }
    }
}

impl From<BackupArgs> for BackupInput {
    fn from(args: BackupArgs) -> Self {
        Self {
            enabled: if args.no_backup { Some(false) } else { None },
            suffix: None,
        }
    }
}

impl From<HookArgs> for HooksInput {
    fn from(args: HookArgs) -> Self {
        Self {
            dir: args.hooks_dir,
        }
    }
}
