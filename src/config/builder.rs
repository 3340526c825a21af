use crate::config::{merge::Merge, types::*};
use anyhow::{Result, bail};

use crate::constants::MAX_IDENTIFIER_LEN;

pub struct ConfigBuilder {
    config_input: ConfigInput,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config_input: ConfigInput::default(),
        }
    }

    pub fn with_file(mut self, file_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(file_input);
        self
    }

    pub fn with_cli_args(mut self, cli_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(cli_input);
        self
    }

    pub fn resolve(self) -> Result<Config> {
        let defaults = Config::default();

        Ok(Config {
            database: self.resolve_database(&defaults.database)?,
            backup: self.resolve_backup(&defaults.backup)?,
            hooks: self.resolve_hooks(&defaults.hooks),
            audit: self.resolve_audit(&defaults.audit),
            run: self.resolve_run(&defaults.run),
        })
    }

    fn resolve_database(&self, defaults: &Database) -> Result<Database> {
        let db_input = self.config_input.database.as_ref();

        let prefix = db_input
            .and_then(|d| d.prefix.as_ref())
            .cloned()
            .unwrap_or_else(|| defaults.prefix.clone());
        if prefix.len() >= MAX_IDENTIFIER_LEN / 2 {
            bail!(
                "database.prefix '{}' is too long: it must be shorter than {} bytes",
                prefix,
                MAX_IDENTIFIER_LEN / 2
            );
        }

        Ok(Database {
            url: db_input
                .and_then(|d| d.url.as_ref())
                .cloned()
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .unwrap_or_else(|| defaults.url.clone()),
            schema: db_input
                .and_then(|d| d.schema.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.schema.clone()),
            prefix,
        })
    }

    fn resolve_backup(&self, defaults: &Backup) -> Result<Backup> {
        let backup_input = self.config_input.backup.as_ref();

        let suffix = backup_input
            .and_then(|b| b.suffix.as_ref())
            .cloned()
            .unwrap_or_else(|| defaults.suffix.clone());

        if suffix.is_empty() {
            bail!("backup.suffix must not be empty: backups would replace the tables they copy");
        }
        if suffix.len() >= MAX_IDENTIFIER_LEN / 2 {
            bail!(
                "backup.suffix '{}' is too long: it must be shorter than {} bytes",
                suffix,
                MAX_IDENTIFIER_LEN / 2
            );
        }

        Ok(Backup {
            enabled: backup_input
                .and_then(|b| b.enabled)
                .unwrap_or(defaults.enabled),
            suffix,
        })
    }

    fn resolve_hooks(&self, defaults: &Hooks) -> Hooks {
        Hooks {
            dir: self
                .config_input
                .hooks
                .as_ref()
                .and_then(|h| h.dir.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.dir.clone()),
        }
    }

    fn resolve_audit(&self, defaults: &Audit) -> Audit {
        let audit_input = self.config_input.audit.as_ref();

        let table = audit_input
            .and_then(|a| a.table.as_ref())
            .map(|t| TrackingTable {
                schema: t
                    .schema
                    .as_ref()
                    .cloned()
                    .unwrap_or_else(|| defaults.table.schema.clone()),
                name: t
                    .name
                    .as_ref()
                    .cloned()
                    .unwrap_or_else(|| defaults.table.name.clone()),
            })
            .unwrap_or_else(|| defaults.table.clone());

        Audit {
            enabled: audit_input
                .and_then(|a| a.enabled)
                .unwrap_or(defaults.enabled),
            table,
        }
    }

    fn resolve_run(&self, defaults: &Run) -> Run {
        Run {
            timing: self
                .config_input
                .run
                .as_ref()
                .and_then(|r| r.timing)
                .unwrap_or(defaults.timing),
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
