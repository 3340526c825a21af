use crate::config::types::*;

/// Trait for merging optional configuration values
pub trait Merge<T> {
    fn merge(self, other: T) -> T;
}

impl<T> Merge<Option<T>> for Option<T> {
    fn merge(self, other: Option<T>) -> Option<T> {
        other.or(self)
    }
}

/// Merge two optional sections field by field, `other` winning.
fn merge_section<T>(a: Option<T>, b: Option<T>, merge_with: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => Some(merge_with(a, b)),
    }
}

impl Merge<ConfigInput> for ConfigInput {
    fn merge(self, other: ConfigInput) -> ConfigInput {
        ConfigInput {
            database: merge_section(self.database, other.database, DatabaseInput::merge_with),
            backup: merge_section(self.backup, other.backup, BackupInput::merge_with),
            hooks: self.hooks.merge(other.hooks),
            audit: merge_section(self.audit, other.audit, AuditInput::merge_with),
            run: self.run.merge(other.run),
        }
    }
}

impl DatabaseInput {
    pub fn merge_with(self, other: DatabaseInput) -> DatabaseInput {
        DatabaseInput {
            url: other.url.or(self.url),
            schema: other.schema.or(self.schema),
            prefix: other.prefix.or(self.prefix),
        }
    }
}

impl BackupInput {
    pub fn merge_with(self, other: BackupInput) -> BackupInput {
        BackupInput {
            enabled: other.enabled.or(self.enabled),
            suffix: other.suffix.or(self.suffix),
        }
    }
}

impl AuditInput {
    pub fn merge_with(self, other: AuditInput) -> AuditInput {
        AuditInput {
            enabled: other.enabled.or(self.enabled),
            table: other.table.or(self.table),
        }
    }
}
