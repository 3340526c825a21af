//! Table snapshots and rollback.
//!
//! Before a run touches a pre-existing table, the table is copied (structure and data) under a
//! derived backup name and its definition is kept as a [`Snapshot`]. Tables created during the run
//! are only tracked by name. Rollback drops what the run created and renames every snapshot back
//! into place, then checks the result against the snapshot definition.
//!
//! Copies carry no foreign keys. Snapshots remember every key on or pointing at the table, and
//! rollback drops incoming keys before it drops tables, then re-creates the remembered ones once
//! every table is back.
//!
//! Snapshots live only as long as the [`BackupManager`] that made them: one run.

use anyhow::{Context, Result, anyhow, bail};
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::constants::{BACKUP_HASH_LEN, MAX_IDENTIFIER_LEN};
use crate::definition::{IndexNames, TableDef};
use crate::driver::{Driver, ForeignKey};
use crate::error::RestoreFailure;

/// A pre-run copy of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub original: String,
    pub backup: String,
    pub definition: TableDef,
    /// Foreign keys on or pointing at the table when it was copied
    pub foreign_keys: Vec<ForeignKey>,
}

/// Derive the backup table name: `{table}{suffix}`, or when that exceeds PostgreSQL's identifier
/// limit, a truncated table name with a hash of the full name before the suffix.
pub fn backup_name(table: &str, suffix: &str) -> String {
    backup_name_within(table, suffix, MAX_IDENTIFIER_LEN)
}

/// [`backup_name`] for a driver that only has `limit` characters to spare.
pub fn backup_name_within(table: &str, suffix: &str, limit: usize) -> String {
    let name = format!("{}{}", table, suffix);
    if name.len() <= limit {
        return name;
    }

    let digest = format!("{:x}", md5::compute(table.as_bytes()));
    let hash = &digest[..BACKUP_HASH_LEN];
    let budget = limit.saturating_sub(suffix.len() + 1 + BACKUP_HASH_LEN);

    let mut end = budget.min(table.len());
    while !table.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}_{}{}", &table[..end], hash, suffix)
}

#[derive(Debug, Default)]
pub struct BackupManager {
    suffix: String,
    snapshots: Vec<Snapshot>,
    added: Vec<String>,
    /// Renames of tables without a snapshot, undone by renaming back.
    renamed: Vec<(String, String)>,
}

impl BackupManager {
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
            ..Self::default()
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn snapshot(&self, table: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.original == table)
    }

    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.added.is_empty() && self.renamed.is_empty()
    }

    /// Copy `table` under its backup name and verify the copy matches the original.
    ///
    /// An existing table under the backup name is never overwritten: it may be the only copy left
    /// by an earlier run.
    pub async fn backup_table<D: Driver>(&mut self, driver: &mut D, table: &str) -> Result<&Snapshot> {
        if self.snapshot(table).is_some() {
            bail!("table '{}' is already backed up in this run", table);
        }

        let definition = driver
            .describe_table(table)
            .await?
            .ok_or_else(|| anyhow!("table '{}' does not exist", table))?;

        let backup = backup_name_within(table, &self.suffix, driver.identifier_budget());
        if driver.table_exists(&backup).await? {
            bail!(
                "backup table '{}' already exists; it may hold data from an earlier run and must be \
                 removed manually",
                backup
            );
        }

        driver
            .copy_table(table, &backup)
            .await
            .with_context(|| format!("Failed to copy '{}' to '{}'", table, backup))?;

        let copy = driver.describe_table(&backup).await?;
        let mismatch = match &copy {
            Some(copy) => definition.structural_mismatch(copy, IndexNames::Ignore),
            None => Some("copy does not exist".to_string()),
        };
        if let Some(mismatch) = mismatch {
            if copy.is_some()
                && let Err(e) = driver.drop_table(&backup).await
            {
                warn!(backup = %backup, error = %e, "Failed to drop mismatching backup copy");
            }
            bail!("backup '{}' does not match '{}': {}", backup, table, mismatch);
        }

        let foreign_keys = match driver.foreign_keys(table).await {
            Ok(keys) => keys,
            Err(e) => {
                if let Err(drop) = driver.drop_table(&backup).await {
                    warn!(backup = %backup, error = %drop, "Failed to drop backup copy");
                }
                return Err(e.context(format!("Failed to read foreign keys of '{}'", table)));
            }
        };

        info!(table, backup = %backup, foreign_keys = foreign_keys.len(), "Backed up table");
        self.snapshots.push(Snapshot {
            original: table.to_string(),
            backup,
            definition,
            foreign_keys,
        });
        Ok(&self.snapshots[self.snapshots.len() - 1])
    }

    /// Register a table created by the run.
    pub fn track_added(&mut self, table: &str) {
        if !self.added.iter().any(|t| t == table) {
            debug!(table, "Tracking added table");
            self.added.push(table.to_string());
        }
    }

    /// Register a completed table rename. With a snapshot of `was` the renamed table is treated as
    /// added (dropped on rollback, then restored from the snapshot); without one, rollback renames
    /// it back.
    pub fn track_rename(&mut self, was: &str, now: &str) {
        if self.snapshot(was).is_some() {
            self.track_added(now);
        } else {
            self.renamed.push((was.to_string(), now.to_string()));
        }
    }

    /// Undo the run: drop added tables, reverse unsnapshotted renames, restore every snapshot.
    ///
    /// Every table is attempted even after a failure. Registries are consumed either way; on
    /// success the restored table names are returned.
    pub async fn rollback<D: Driver>(
        &mut self,
        driver: &mut D,
    ) -> std::result::Result<Vec<String>, Vec<RestoreFailure>> {
        let mut failures = Vec::new();

        self.lift_foreign_keys(driver, &mut failures).await;
        let foreign_keys: Vec<ForeignKey> = self
            .snapshots
            .iter()
            .flat_map(|s| s.foreign_keys.iter().cloned())
            .unique_by(|k| (k.table.clone(), k.name.clone()))
            .collect();

        for table in std::mem::take(&mut self.added) {
            let result = async {
                if driver.table_exists(&table).await? {
                    driver.drop_table(&table).await?;
                    info!(table = %table, "Dropped table added by the run");
                }
                Ok::<_, anyhow::Error>(())
            }
            .await;
            if let Err(e) = result {
                failures.push(restore_failure(&table, e));
            }
        }

        for (was, now) in std::mem::take(&mut self.renamed).into_iter().rev() {
            let result = async {
                if driver.table_exists(&now).await? && !driver.table_exists(&was).await? {
                    driver.rename_table(&now, &was).await?;
                    info!(table = %was, from = %now, "Renamed table back");
                }
                Ok::<_, anyhow::Error>(())
            }
            .await;
            if let Err(e) = result {
                failures.push(restore_failure(&was, e));
            }
        }

        let mut restored = Vec::new();
        for snapshot in std::mem::take(&mut self.snapshots) {
            match restore(driver, &snapshot).await {
                Ok(()) => {
                    info!(table = %snapshot.original, backup = %snapshot.backup, "Restored table");
                    restored.push(snapshot.original);
                }
                Err(e) => failures.push(restore_failure(&snapshot.original, e)),
            }
        }

        for key in &foreign_keys {
            if let Err(e) = restore_foreign_key(driver, key).await {
                failures.push(restore_failure(&key.table, e));
            }
        }

        if failures.is_empty() {
            Ok(restored)
        } else {
            Err(failures)
        }
    }

    /// Drop foreign keys that point at a table rollback is about to drop from some other table.
    /// Snapshots hold the keys that existed before the run; those are re-created afterwards.
    async fn lift_foreign_keys<D: Driver>(&self, driver: &mut D, failures: &mut Vec<RestoreFailure>) {
        let doomed = self
            .added
            .iter()
            .chain(self.snapshots.iter().map(|s| &s.original));

        for table in doomed {
            let result = async {
                if !driver.table_exists(table).await? {
                    return Ok(());
                }
                for key in driver.foreign_keys(table).await? {
                    if key.is_incoming(table) {
                        driver.drop_foreign_key(&key).await?;
                        debug!(table = %table, key = %key.name, from = %key.table, "Lifted foreign key");
                    }
                }
                Ok::<_, anyhow::Error>(())
            }
            .await;
            if let Err(e) = result {
                failures.push(restore_failure(table, e));
            }
        }
    }

    /// The run is good: drop every backup copy and forget the registries. Returns the dropped
    /// backup names. A copy that cannot be dropped is left in place with a warning.
    pub async fn commit<D: Driver>(&mut self, driver: &mut D) -> Vec<String> {
        self.added.clear();
        self.renamed.clear();
        self.discard(driver).await
    }

    /// Drop the backup copies made so far without restoring anything.
    pub async fn discard<D: Driver>(&mut self, driver: &mut D) -> Vec<String> {
        let mut dropped = Vec::new();
        for snapshot in std::mem::take(&mut self.snapshots) {
            match driver.drop_table(&snapshot.backup).await {
                Ok(()) => {
                    debug!(backup = %snapshot.backup, "Dropped backup table");
                    dropped.push(snapshot.backup);
                }
                Err(e) => warn!(
                    backup = %snapshot.backup,
                    error = %e,
                    "Failed to drop backup table, remove it manually"
                ),
            }
        }
        dropped
    }
}

fn restore_failure(table: &str, error: anyhow::Error) -> RestoreFailure {
    warn!(table, error = %format!("{:#}", error), "Rollback step failed");
    RestoreFailure {
        table: table.to_string(),
        reason: format!("{:#}", error),
    }
}

async fn restore_foreign_key<D: Driver>(driver: &mut D, key: &ForeignKey) -> Result<()> {
    let present = driver
        .foreign_keys(&key.table)
        .await?
        .iter()
        .any(|k| k.table == key.table && k.name == key.name);
    if !present {
        driver
            .create_foreign_key(key)
            .await
            .with_context(|| format!("Failed to re-create foreign key '{}'", key.name))?;
        info!(table = %key.table, key = %key.name, references = %key.references, "Restored foreign key");
    }
    Ok(())
}

async fn restore<D: Driver>(driver: &mut D, snapshot: &Snapshot) -> Result<()> {
    let original = &snapshot.original;

    if !driver.table_exists(&snapshot.backup).await? {
        bail!("backup table '{}' is missing", snapshot.backup);
    }
    if driver.table_exists(original).await? {
        driver.drop_table(original).await?;
    }
    driver.rename_table(&snapshot.backup, original).await?;

    let live = driver
        .describe_table(original)
        .await?
        .ok_or_else(|| anyhow!("table '{}' vanished after restore", original))?;

    for index in &snapshot.definition.indexes {
        if live.index(&index.name).is_some() {
            continue;
        }
        let candidate = live.indexes.iter().find(|l| {
            l.same_shape(index) && snapshot.definition.index(&l.name).is_none()
        });
        if let Some(candidate) = candidate {
            driver
                .rename_index(original, &candidate.name, &index.name)
                .await?;
        }
    }

    let restored = driver
        .describe_table(original)
        .await?
        .ok_or_else(|| anyhow!("table '{}' vanished after restore", original))?;
    if let Some(mismatch) = snapshot
        .definition
        .structural_mismatch(&restored, IndexNames::Compare)
    {
        bail!("restored table differs from its snapshot: {}", mismatch);
    }

    Ok(())
}
