//! Table prefixes.
//!
//! Several applications can share one schema by prefixing their table names. [`Prefixed`] hides
//! the prefix: the engine and every definition see bare names, while the wrapped driver sees the
//! prefixed ones. Index names carry the prefix too when they start with it, as the indexes
//! PostgreSQL names after their table do.

use anyhow::Result;

use super::{Driver, ForeignKey};
use crate::definition::{FieldDef, IndexDef, TableDef};

pub struct Prefixed<D> {
    inner: D,
    prefix: String,
}

impl<D: Driver> Prefixed<D> {
    pub fn new(inner: D, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    fn physical(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// The bare name, or `None` for names outside the prefix.
    fn logical<'n>(&self, name: &'n str) -> Option<&'n str> {
        name.strip_prefix(self.prefix.as_str())
    }

    fn physical_index(&self, index: &IndexDef) -> IndexDef {
        IndexDef {
            name: self.physical(&index.name),
            ..index.clone()
        }
    }

    fn strip_table(&self, mut table: TableDef, name: &str) -> TableDef {
        table.name = name.to_string();
        for index in table.indexes.iter_mut() {
            if let Some(bare) = self.logical(&index.name) {
                index.name = bare.to_string();
            }
        }
        table
    }
}

impl<D: Driver> Driver for Prefixed<D> {
    /// Only tables carrying the prefix, without it.
    async fn table_names(&mut self) -> Result<Vec<String>> {
        let names = self.inner.table_names().await?;
        Ok(names
            .iter()
            .filter_map(|name| self.logical(name))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn describe_table(&mut self, table: &str) -> Result<Option<TableDef>> {
        let physical = self.physical(table);
        Ok(self
            .inner
            .describe_table(&physical)
            .await?
            .map(|def| self.strip_table(def, table)))
    }

    async fn create_table(&mut self, table: &str, fields: &[FieldDef]) -> Result<()> {
        let physical = self.physical(table);
        self.inner.create_table(&physical, fields).await
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        let physical = self.physical(table);
        self.inner.drop_table(&physical).await
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (self.physical(from), self.physical(to));
        self.inner.rename_table(&from, &to).await
    }

    async fn copy_table(&mut self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (self.physical(from), self.physical(to));
        self.inner.copy_table(&from, &to).await
    }

    async fn add_field(&mut self, table: &str, field: &FieldDef) -> Result<()> {
        let physical = self.physical(table);
        self.inner.add_field(&physical, field).await
    }

    async fn alter_field(&mut self, table: &str, field: &FieldDef) -> Result<()> {
        let physical = self.physical(table);
        self.inner.alter_field(&physical, field).await
    }

    async fn drop_field(&mut self, table: &str, field: &str) -> Result<()> {
        let physical = self.physical(table);
        self.inner.drop_field(&physical, field).await
    }

    async fn rename_field(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let physical = self.physical(table);
        self.inner.rename_field(&physical, from, to).await
    }

    async fn create_index(&mut self, table: &str, index: &IndexDef) -> Result<()> {
        let (physical, index) = (self.physical(table), self.physical_index(index));
        self.inner.create_index(&physical, &index).await
    }

    async fn drop_index(&mut self, table: &str, index: &IndexDef) -> Result<()> {
        let physical = self.physical(table);
        // indexes created outside the prefix keep their bare names
        let index = match self.inner.describe_table(&physical).await? {
            Some(live) if live.index(&index.name).is_some() => index.clone(),
            _ => self.physical_index(index),
        };
        self.inner.drop_index(&physical, &index).await
    }

    async fn rename_index(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let physical = self.physical(table);
        let from = match self.inner.describe_table(&physical).await? {
            Some(live) if live.index(from).is_some() => from.to_string(),
            _ => self.physical(from),
        };
        let to = self.physical(to);
        self.inner.rename_index(&physical, &from, &to).await
    }

    /// Keys between prefixed tables only. A key from or to a table outside the prefix is not
    /// reported, so rollback cannot lift it.
    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>> {
        let physical = self.physical(table);
        let keys = self.inner.foreign_keys(&physical).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let owner = self.logical(&key.table)?.to_string();
                let references = self.logical(&key.references)?.to_string();
                Some(ForeignKey {
                    table: owner,
                    references,
                    ..key
                })
            })
            .collect())
    }

    async fn create_foreign_key(&mut self, key: &ForeignKey) -> Result<()> {
        let key = ForeignKey {
            table: self.physical(&key.table),
            references: self.physical(&key.references),
            ..key.clone()
        };
        self.inner.create_foreign_key(&key).await
    }

    async fn drop_foreign_key(&mut self, key: &ForeignKey) -> Result<()> {
        let key = ForeignKey {
            table: self.physical(&key.table),
            references: self.physical(&key.references),
            ..key.clone()
        };
        self.inner.drop_foreign_key(&key).await
    }

    fn identifier_budget(&self) -> usize {
        self.inner
            .identifier_budget()
            .saturating_sub(self.prefix.len())
    }
}
