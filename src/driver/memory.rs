//! In-memory driver.
//!
//! Keeps table definitions and rows in process memory and enforces the same rules a real
//! database would for the operations the engine issues (existence, duplicate names, NOT NULL and
//! uniqueness against existing rows). Foreign keys are tracked by name only, enough to refuse
//! dropping a referenced table. Used by tests and by dry runs.
//!
//! Failures can be injected per operation and object with [`MemoryDriver::fail_on`], and every
//! successful operation is appended to a journal.

use anyhow::{Result, anyhow, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{Driver, ForeignKey};
use crate::definition::{Definition, FieldDef, IndexDef, TableDef};

pub type Row = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOp {
    CreateTable,
    DropTable,
    RenameTable,
    CopyTable,
    AddField,
    AlterField,
    DropField,
    RenameField,
    CreateIndex,
    DropIndex,
    RenameIndex,
    CreateForeignKey,
    DropForeignKey,
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverOp::CreateTable => "create_table",
            DriverOp::DropTable => "drop_table",
            DriverOp::RenameTable => "rename_table",
            DriverOp::CopyTable => "copy_table",
            DriverOp::AddField => "add_field",
            DriverOp::AlterField => "alter_field",
            DriverOp::DropField => "drop_field",
            DriverOp::RenameField => "rename_field",
            DriverOp::CreateIndex => "create_index",
            DriverOp::DropIndex => "drop_index",
            DriverOp::RenameIndex => "rename_index",
            DriverOp::CreateForeignKey => "create_foreign_key",
            DriverOp::DropForeignKey => "drop_foreign_key",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
struct MemTable {
    def: TableDef,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    tables: BTreeMap<String, MemTable>,
    foreign_keys: Vec<ForeignKey>,
    failures: Vec<(DriverOp, String)>,
    journal: Vec<String>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose tables match `definition`, without rows.
    pub fn from_definition(definition: &Definition) -> Self {
        let tables = definition
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    MemTable {
                        def: t.clone(),
                        rows: Vec::new(),
                    },
                )
            })
            .collect();

        Self {
            tables,
            ..Self::default()
        }
    }

    pub fn definition(&self) -> Definition {
        Definition::new(self.tables.values().map(|t| t.def.clone()).collect())
    }

    pub fn insert_row(&mut self, table: &str, row: Row) -> Result<()> {
        let entry = self.table_mut(table)?;
        for key in row.keys() {
            if !entry.def.has_field(key) {
                bail!("column \"{}\" of relation \"{}\" does not exist", key, table);
            }
        }
        let full: Row = entry
            .def
            .fields
            .iter()
            .map(|f| {
                let value = row.get(&f.name).cloned().unwrap_or_else(|| f.default.clone());
                (f.name.clone(), value)
            })
            .collect();
        entry.rows.push(full);
        Ok(())
    }

    pub fn rows(&self, table: &str) -> Option<&[Row]> {
        self.tables.get(table).map(|t| t.rows.as_slice())
    }

    /// Make the next `op` on `target` fail. Targets are `table`, `table.field` or `table.index`.
    pub fn fail_on(&mut self, op: DriverOp, target: &str) {
        self.failures.push((op, target.to_string()));
    }

    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    fn check(&mut self, op: DriverOp, target: &str) -> Result<()> {
        if let Some(position) = self
            .failures
            .iter()
            .position(|(o, t)| *o == op && t == target)
        {
            self.failures.remove(position);
            bail!("injected failure: {} {}", op, target);
        }
        Ok(())
    }

    fn record(&mut self, op: DriverOp, target: &str) {
        self.journal.push(format!("{} {}", op, target));
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut MemTable> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", table))
    }

    fn ensure_absent(&self, table: &str) -> Result<()> {
        if self.tables.contains_key(table) {
            bail!("relation \"{}\" already exists", table);
        }
        Ok(())
    }
}

fn field_position(def: &TableDef, field: &str) -> Result<usize> {
    def.fields
        .iter()
        .position(|f| f.name == field)
        .ok_or_else(|| anyhow!("column \"{}\" of relation \"{}\" does not exist", field, def.name))
}

fn check_rows_fit(table: &MemTable, field: &FieldDef) -> Result<()> {
    for row in &table.rows {
        match row.get(&field.name).cloned().flatten() {
            None if !field.nullable => bail!(
                "column \"{}\" of relation \"{}\" contains null values",
                field.name,
                table.def.name
            ),
            Some(value) if field.length.is_some_and(|l| value.chars().count() > l as usize) => {
                bail!("value too long for type {}", field.sql_type())
            }
            _ => {}
        }
    }
    Ok(())
}

impl Driver for MemoryDriver {
    async fn table_names(&mut self) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn describe_table(&mut self, table: &str) -> Result<Option<TableDef>> {
        Ok(self.tables.get(table).map(|t| t.def.clone()))
    }

    async fn create_table(&mut self, table: &str, fields: &[FieldDef]) -> Result<()> {
        self.check(DriverOp::CreateTable, table)?;
        self.ensure_absent(table)?;

        // primary key membership comes with the primary key index
        let fields = fields
            .iter()
            .map(|f| FieldDef {
                primary: false,
                ..f.clone()
            })
            .collect();
        self.tables.insert(
            table.to_string(),
            MemTable {
                def: TableDef::new(table, fields, vec![]),
                rows: Vec::new(),
            },
        );
        self.record(DriverOp::CreateTable, table);
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.check(DriverOp::DropTable, table)?;
        if !self.tables.contains_key(table) {
            bail!("table \"{}\" does not exist", table);
        }
        if let Some(key) = self
            .foreign_keys
            .iter()
            .find(|k| k.references == table && k.table != table)
        {
            bail!(
                "cannot drop table {} because other objects depend on it: constraint {} on table {}",
                table,
                key.name,
                key.table
            );
        }
        self.tables.remove(table);
        self.foreign_keys.retain(|k| k.table != table);
        self.record(DriverOp::DropTable, table);
        Ok(())
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        self.check(DriverOp::RenameTable, from)?;
        self.ensure_absent(to)?;
        let mut entry = self
            .tables
            .remove(from)
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", from))?;
        entry.def.name = to.to_string();
        self.tables.insert(to.to_string(), entry);
        for key in self.foreign_keys.iter_mut() {
            if key.table == from {
                key.table = to.to_string();
            }
            if key.references == from {
                key.references = to.to_string();
            }
        }
        self.record(DriverOp::RenameTable, &format!("{} -> {}", from, to));
        Ok(())
    }

    async fn copy_table(&mut self, from: &str, to: &str) -> Result<()> {
        self.check(DriverOp::CopyTable, from)?;
        self.ensure_absent(to)?;
        let mut copy = self
            .tables
            .get(from)
            .cloned()
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", from))?;
        copy.def.name = to.to_string();
        self.tables.insert(to.to_string(), copy);
        self.record(DriverOp::CopyTable, &format!("{} -> {}", from, to));
        Ok(())
    }

    async fn add_field(&mut self, table: &str, field: &FieldDef) -> Result<()> {
        let target = format!("{}.{}", table, field.name);
        self.check(DriverOp::AddField, &target)?;
        let entry = self.table_mut(table)?;
        if entry.def.has_field(&field.name) {
            bail!("column \"{}\" of relation \"{}\" already exists", field.name, table);
        }
        if !field.nullable && field.default.is_none() && !field.autoincrement && !entry.rows.is_empty() {
            bail!("column \"{}\" of relation \"{}\" contains null values", field.name, table);
        }

        for row in entry.rows.iter_mut() {
            row.insert(field.name.clone(), field.default.clone());
        }
        entry.def.fields.push(FieldDef {
            primary: false,
            ..field.clone()
        });
        self.record(DriverOp::AddField, &target);
        Ok(())
    }

    async fn alter_field(&mut self, table: &str, field: &FieldDef) -> Result<()> {
        let target = format!("{}.{}", table, field.name);
        self.check(DriverOp::AlterField, &target)?;
        let entry = self.table_mut(table)?;
        let position = field_position(&entry.def, &field.name)?;
        check_rows_fit(entry, field)?;

        // primary key membership is owned by the primary key index
        let primary = entry.def.fields[position].primary;
        entry.def.fields[position] = FieldDef {
            primary,
            ..field.clone()
        };
        self.record(DriverOp::AlterField, &target);
        Ok(())
    }

    async fn drop_field(&mut self, table: &str, field: &str) -> Result<()> {
        let target = format!("{}.{}", table, field);
        self.check(DriverOp::DropField, &target)?;
        let entry = self.table_mut(table)?;
        let position = field_position(&entry.def, field)?;

        entry.def.fields.remove(position);
        let mut dropped_primary = false;
        entry.def.indexes.retain(|i| {
            let covers = i.covers_field(field);
            dropped_primary |= covers && i.primary;
            !covers
        });
        if dropped_primary {
            for field in entry.def.fields.iter_mut() {
                field.primary = false;
            }
        }
        for row in entry.rows.iter_mut() {
            row.remove(field);
        }
        self.record(DriverOp::DropField, &target);
        Ok(())
    }

    async fn rename_field(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let target = format!("{}.{}", table, from);
        self.check(DriverOp::RenameField, &target)?;
        let entry = self.table_mut(table)?;
        if entry.def.has_field(to) {
            bail!("column \"{}\" of relation \"{}\" already exists", to, table);
        }
        let position = field_position(&entry.def, from)?;

        entry.def.fields[position].name = to.to_string();
        for index in entry.def.indexes.iter_mut() {
            for column in index.fields.iter_mut().filter(|c| c.field == from) {
                column.field = to.to_string();
            }
        }
        for row in entry.rows.iter_mut() {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
        self.record(DriverOp::RenameField, &format!("{} -> {}", target, to));
        Ok(())
    }

    async fn create_index(&mut self, table: &str, index: &IndexDef) -> Result<()> {
        let target = format!("{}.{}", table, index.name);
        self.check(DriverOp::CreateIndex, &target)?;
        let entry = self.table_mut(table)?;
        if entry.def.index(&index.name).is_some() {
            bail!("relation \"{}\" already exists", index.name);
        }
        if index.primary && entry.def.primary_key().is_some() {
            bail!("multiple primary keys for table \"{}\" are not allowed", table);
        }
        for column in &index.fields {
            field_position(&entry.def, &column.field)?;
        }

        if index.unique {
            let mut seen = BTreeSet::new();
            for row in &entry.rows {
                let key: Vec<_> = index
                    .fields
                    .iter()
                    .map(|c| row.get(&c.field).cloned().flatten())
                    .collect();
                // NULLs never collide
                if key.iter().all(Option::is_some) && !seen.insert(key) {
                    bail!("could not create unique index \"{}\": duplicate key", index.name);
                }
            }
        }

        if index.primary {
            for field in entry.def.fields.iter_mut() {
                if index.covers_field(&field.name) {
                    field.primary = true;
                    field.nullable = false;
                }
            }
        }
        entry.def.indexes.push(index.clone());
        self.record(DriverOp::CreateIndex, &target);
        Ok(())
    }

    async fn drop_index(&mut self, table: &str, index: &IndexDef) -> Result<()> {
        let target = format!("{}.{}", table, index.name);
        self.check(DriverOp::DropIndex, &target)?;
        let entry = self.table_mut(table)?;
        let position = entry
            .def
            .indexes
            .iter()
            .position(|i| i.name == index.name)
            .ok_or_else(|| anyhow!("index \"{}\" does not exist", index.name))?;

        let removed = entry.def.indexes.remove(position);
        if removed.primary {
            for field in entry.def.fields.iter_mut() {
                field.primary = false;
            }
        }
        self.record(DriverOp::DropIndex, &target);
        Ok(())
    }

    async fn rename_index(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let target = format!("{}.{}", table, from);
        self.check(DriverOp::RenameIndex, &target)?;
        let entry = self.table_mut(table)?;
        if entry.def.index(to).is_some() {
            bail!("relation \"{}\" already exists", to);
        }
        let index = entry
            .def
            .indexes
            .iter_mut()
            .find(|i| i.name == from)
            .ok_or_else(|| anyhow!("index \"{}\" does not exist", from))?;
        index.name = to.to_string();
        self.record(DriverOp::RenameIndex, &format!("{} -> {}", target, to));
        Ok(())
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>> {
        Ok(self
            .foreign_keys
            .iter()
            .filter(|k| k.table == table || k.references == table)
            .cloned()
            .collect())
    }

    async fn create_foreign_key(&mut self, key: &ForeignKey) -> Result<()> {
        let target = format!("{}.{}", key.table, key.name);
        self.check(DriverOp::CreateForeignKey, &target)?;
        self.table_mut(&key.table)?;
        self.table_mut(&key.references)?;
        if self
            .foreign_keys
            .iter()
            .any(|k| k.table == key.table && k.name == key.name)
        {
            bail!(
                "constraint \"{}\" for relation \"{}\" already exists",
                key.name,
                key.table
            );
        }
        self.foreign_keys.push(key.clone());
        self.record(DriverOp::CreateForeignKey, &target);
        Ok(())
    }

    async fn drop_foreign_key(&mut self, key: &ForeignKey) -> Result<()> {
        let target = format!("{}.{}", key.table, key.name);
        self.check(DriverOp::DropForeignKey, &target)?;
        let position = self
            .foreign_keys
            .iter()
            .position(|k| k.table == key.table && k.name == key.name)
            .ok_or_else(|| {
                anyhow!(
                    "constraint \"{}\" of relation \"{}\" does not exist",
                    key.name,
                    key.table
                )
            })?;
        self.foreign_keys.remove(position);
        self.record(DriverOp::DropForeignKey, &target);
        Ok(())
    }
}
