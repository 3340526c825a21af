//! Database drivers.
//!
//! The engine never builds SQL itself. It issues structural intents through [`Driver`], whose
//! operations are synchronous from the engine's point of view: each one completes before the
//! next is issued, all against one connection.

use anyhow::Result;

use crate::constants::MAX_IDENTIFIER_LEN;
use crate::definition::{FieldDef, IndexDef, TableDef};

pub mod memory;
pub mod postgres;
pub mod prefixed;

pub use memory::MemoryDriver;
pub use postgres::PgDriver;
pub use prefixed::Prefixed;

/// A foreign key constraint between two tables of the managed schema.
///
/// Definitions do not model foreign keys, but rollback has to lift and restore them around the
/// tables it drops and renames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    /// Table the constraint is declared on
    pub table: String,
    /// Table the constraint points at
    pub references: String,
    /// Constraint body as the database prints it, e.g. `FOREIGN KEY (user_id) REFERENCES users(id)`
    pub definition: String,
}

impl ForeignKey {
    pub fn new(name: &str, table: &str, references: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            references: references.to_string(),
            definition: String::new(),
        }
    }

    pub fn definition(mut self, definition: &str) -> Self {
        self.definition = definition.to_string();
        self
    }

    /// Declared on another table and pointing at `table`.
    pub fn is_incoming(&self, table: &str) -> bool {
        self.references == table && self.table != table
    }
}

#[allow(async_fn_in_trait)]
pub trait Driver {
    /// Names of every table in the managed schema.
    async fn table_names(&mut self) -> Result<Vec<String>>;

    /// Full structural definition of a table, `None` when it does not exist.
    async fn describe_table(&mut self, table: &str) -> Result<Option<TableDef>>;

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.describe_table(table).await?.is_some())
    }

    /// Create a table with its fields. Indexes are created separately.
    async fn create_table(&mut self, table: &str, fields: &[FieldDef]) -> Result<()>;

    async fn drop_table(&mut self, table: &str) -> Result<()>;

    async fn rename_table(&mut self, from: &str, to: &str) -> Result<()>;

    /// Copy structure (fields and indexes) and data of `from` into a new table `to`.
    ///
    /// Index names on the copy are chosen by the driver.
    async fn copy_table(&mut self, from: &str, to: &str) -> Result<()>;

    async fn add_field(&mut self, table: &str, field: &FieldDef) -> Result<()>;

    /// Bring an existing field in line with `field` in a single operation.
    async fn alter_field(&mut self, table: &str, field: &FieldDef) -> Result<()>;

    async fn drop_field(&mut self, table: &str, field: &str) -> Result<()>;

    async fn rename_field(&mut self, table: &str, from: &str, to: &str) -> Result<()>;

    /// Create a plain index, unique constraint or primary key depending on the flags.
    async fn create_index(&mut self, table: &str, index: &IndexDef) -> Result<()>;

    async fn drop_index(&mut self, table: &str, index: &IndexDef) -> Result<()>;

    async fn rename_index(&mut self, table: &str, from: &str, to: &str) -> Result<()>;

    /// Foreign keys declared on `table` or pointing at it.
    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>>;

    async fn create_foreign_key(&mut self, key: &ForeignKey) -> Result<()>;

    async fn drop_foreign_key(&mut self, key: &ForeignKey) -> Result<()>;

    /// Longest table name the engine may ask for.
    fn identifier_budget(&self) -> usize {
        MAX_IDENTIFIER_LEN
    }
}
