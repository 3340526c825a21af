//! Table and field definitions
use serde::{Deserialize, Serialize};

use super::index::IndexDef;

fn default_nullable() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default = "default_nullable", skip_serializing_if = "is_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub autoincrement: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary: bool,
}

impl FieldDef {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            length: None,
            default: None,
            nullable: true,
            autoincrement: false,
            primary: false,
        }
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn default_value(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    /// Primary key members are implicitly NOT NULL.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    /// The same definition under another name.
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Type as written in DDL, e.g. `varchar(64)`.
    pub fn sql_type(&self) -> String {
        match self.length {
            Some(length) => format!("{}({})", self.data_type, length),
            None => self.data_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDef>,
}

/// How index names take part in a structural comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexNames {
    Compare,
    Ignore,
}

impl TableDef {
    pub fn new(name: &str, fields: Vec<FieldDef>, indexes: Vec<IndexDef>) -> Self {
        Self {
            name: name.to_string(),
            fields,
            indexes,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn primary_key(&self) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.primary)
    }

    /// Describe the first structural difference between two tables, ignoring table names.
    ///
    /// Fields are compared in order with every attribute. Indexes are matched by name when
    /// `names` is `Compare`, otherwise by shape so that driver-chosen names on a copy are accepted.
    pub fn structural_mismatch(&self, other: &TableDef, names: IndexNames) -> Option<String> {
        if self.fields.len() != other.fields.len() {
            return Some(format!(
                "field count differs: {} vs {}",
                self.fields.len(),
                other.fields.len()
            ));
        }

        for (position, (a, b)) in self.fields.iter().zip(&other.fields).enumerate() {
            if a != b {
                return Some(format!(
                    "field #{} differs: {:?} vs {:?}",
                    position + 1,
                    a,
                    b
                ));
            }
        }

        if self.indexes.len() != other.indexes.len() {
            return Some(format!(
                "index count differs: {} vs {}",
                self.indexes.len(),
                other.indexes.len()
            ));
        }

        for index in &self.indexes {
            let matched = match names {
                IndexNames::Compare => other.index(&index.name) == Some(index),
                IndexNames::Ignore => other.indexes.iter().any(|o| o.same_shape(index)),
            };
            if !matched {
                return Some(format!("index '{}' has no counterpart", index.name));
            }
        }

        None
    }
}
