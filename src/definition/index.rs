//! Index definitions: plain indexes, unique constraints and primary keys
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl IndexField {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary: bool,
    pub fields: Vec<IndexField>,
}

impl IndexDef {
    pub fn plain(name: &str, fields: Vec<IndexField>) -> Self {
        Self {
            name: name.to_string(),
            unique: false,
            primary: false,
            fields,
        }
    }

    pub fn unique(name: &str, fields: Vec<IndexField>) -> Self {
        Self {
            unique: true,
            ..Self::plain(name, fields)
        }
    }

    /// Primary keys are always unique as well.
    pub fn primary(name: &str, fields: Vec<IndexField>) -> Self {
        Self {
            unique: true,
            primary: true,
            ..Self::plain(name, fields)
        }
    }

    pub fn kind(&self) -> IndexKind {
        if self.primary {
            IndexKind::Primary
        } else if self.unique {
            IndexKind::Unique
        } else {
            IndexKind::Plain
        }
    }

    /// Same fields, directions and flags, regardless of name.
    pub fn same_shape(&self, other: &IndexDef) -> bool {
        self.unique == other.unique && self.primary == other.primary && self.fields == other.fields
    }

    pub fn covers_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Plain,
    Unique,
    Primary,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Plain => write!(f, "index"),
            IndexKind::Unique => write!(f, "unique index"),
            IndexKind::Primary => write!(f, "primary key"),
        }
    }
}
