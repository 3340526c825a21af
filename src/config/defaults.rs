use crate::config::types::*;
use crate::constants::{
    DEFAULT_AUDIT_SCHEMA, DEFAULT_AUDIT_TABLE, DEFAULT_BACKUP_SUFFIX, DEFAULT_HOOKS_DIR,
};

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/postgres".to_string(),
            schema: "public".to_string(),
            prefix: String::new(),
        }
    }
}

impl Default for Backup {
    fn default() -> Self {
        Self {
            enabled: true,
            suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            dir: DEFAULT_HOOKS_DIR.to_string(),
        }
    }
}

impl Default for Audit {
    fn default() -> Self {
        Self {
            enabled: true,
            table: TrackingTable::default(),
        }
    }
}

impl Default for TrackingTable {
    fn default() -> Self {
        Self {
            schema: DEFAULT_AUDIT_SCHEMA.to_string(),
            name: DEFAULT_AUDIT_TABLE.to_string(),
        }
    }
}
