// Configuration file name
pub const CONFIG_FILENAME: &str = "pgshift.yaml";

// Backup tables
pub const DEFAULT_BACKUP_SUFFIX: &str = "__bak";
pub const BACKUP_HASH_LEN: usize = 8;

// PostgreSQL truncates identifiers longer than this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

// Audit tracking table
pub const DEFAULT_AUDIT_SCHEMA: &str = "public";
pub const DEFAULT_AUDIT_TABLE: &str = "pgshift_audit";
// Schema name audit entries carry when a changeset does not name one
pub const DEFAULT_SCHEMA_NAME: &str = "default";

pub const DEFAULT_HOOKS_DIR: &str = "hooks";
