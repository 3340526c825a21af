//! PostgreSQL driver: catalog introspection and DDL over a single pooled connection.
//!
//! Table copies are made independent of their source: serial columns get a sequence of their own
//! and foreign keys are left behind, so either table can be dropped without touching the other.

use anyhow::{Context, Result, anyhow};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;

use super::{Driver, ForeignKey};
use crate::backup::backup_name;
use crate::db::error_context::SqlErrorContext;
use crate::definition::{FieldDef, IndexDef, IndexField, SortDirection, TableDef};
use crate::render::{
    escape_string, qualified, quote_ident, render_alter_field, render_create_index,
    render_create_table, render_drop_index, render_field,
};

const FIELDS_QUERY: &str = r#"
SELECT
    c.column_name::text AS name,
    c.data_type::text AS data_type,
    c.udt_name::text AS udt_name,
    c.character_maximum_length::int AS length,
    c.column_default::text AS default_expr,
    (c.is_nullable = 'YES') AS nullable,
    (c.is_identity = 'YES') AS identity
FROM information_schema.columns c
WHERE c.table_schema = $1 AND c.table_name = $2
ORDER BY c.ordinal_position
"#;

const INDEXES_QUERY: &str = r#"
SELECT
    i.relname::text AS index_name,
    ix.indisunique AS is_unique,
    ix.indisprimary AS is_primary,
    a.attname::text AS field,
    (ix.indoption[(k.ord - 1)::int]::int & 1) = 1 AS descending
FROM pg_index ix
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE n.nspname = $1 AND t.relname = $2
ORDER BY ix.indisprimary DESC, i.relname, k.ord
"#;

const SEQUENCES_QUERY: &str = r#"
SELECT
    a.attname::text AS column_name,
    s.relname::text AS sequence_name,
    format_type(ps.seqtypid, NULL) AS sequence_type,
    (d.deptype = 'i') AS identity
FROM pg_depend d
JOIN pg_class s ON s.oid = d.objid AND s.relkind = 'S'
JOIN pg_sequence ps ON ps.seqrelid = s.oid
JOIN pg_class t ON t.oid = d.refobjid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = d.refobjsubid
WHERE d.classid = 'pg_class'::regclass
  AND d.refclassid = 'pg_class'::regclass
  AND d.deptype IN ('a', 'i')
  AND n.nspname = $1 AND t.relname = $2
ORDER BY a.attnum
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
SELECT
    con.conname::text AS name,
    t.relname::text AS table_name,
    r.relname::text AS referenced_table,
    pg_get_constraintdef(con.oid) AS definition
FROM pg_constraint con
JOIN pg_class t ON t.oid = con.conrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_class r ON r.oid = con.confrelid
JOIN pg_namespace rn ON rn.oid = r.relnamespace
WHERE con.contype = 'f'
  AND n.nspname = $1 AND rn.nspname = $1
  AND (t.relname = $2 OR r.relname = $2)
ORDER BY t.relname, con.conname
"#;

/// A sequence owned by a column, through `serial` or an identity.
#[derive(Debug, Clone)]
struct OwnedSequence {
    column: String,
    sequence: String,
    data_type: String,
    identity: bool,
}

/// Name PostgreSQL gives the sequence behind `table.column`, shortened like backup names when
/// it would not fit.
fn sequence_name(table: &str, column: &str) -> String {
    backup_name(&format!("{}_{}", table, column), "_seq")
}

pub struct PgDriver {
    conn: PoolConnection<Postgres>,
    schema: String,
}

impl PgDriver {
    pub fn new(conn: PoolConnection<Postgres>, schema: &str) -> Self {
        Self {
            conn,
            schema: schema.to_string(),
        }
    }

    /// Take the one connection a run works on out of the pool.
    pub async fn acquire(pool: &PgPool, schema: &str) -> Result<Self> {
        let conn = pool
            .acquire()
            .await
            .context("Failed to acquire a database connection")?;
        Ok(Self::new(conn, schema))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn table(&self, name: &str) -> String {
        qualified(&self.schema, name)
    }

    async fn execute(&mut self, action: &str, sql: &str) -> Result<()> {
        debug!(sql, "Executing");
        sqlx::query(sql)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| anyhow!(SqlErrorContext::from_sqlx_error(&e, sql).format(action, sql)))?;
        Ok(())
    }

    async fn describe_fields(&mut self, table: &str) -> Result<Vec<FieldDef>> {
        let rows = sqlx::query(FIELDS_QUERY)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to read columns of {}", table))?;

        let mut fields = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let data_type: String = row.try_get("data_type")?;
            let udt_name: String = row.try_get("udt_name")?;
            let length: Option<i32> = row.try_get("length")?;
            let default_expr: Option<String> = row.try_get("default_expr")?;
            let identity: bool = row.try_get("identity")?;

            let serial = default_expr
                .as_deref()
                .is_some_and(|d| d.starts_with("nextval("));

            fields.push(FieldDef {
                name,
                data_type: normalize_type(&data_type, &udt_name),
                length: length.and_then(|l| u32::try_from(l).ok()),
                default: if serial {
                    None
                } else {
                    default_expr.as_deref().map(parse_default)
                },
                nullable: row.try_get("nullable")?,
                autoincrement: identity || serial,
                primary: false,
            });
        }

        Ok(fields)
    }

    async fn describe_indexes(&mut self, table: &str) -> Result<Vec<IndexDef>> {
        let rows = sqlx::query(INDEXES_QUERY)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to read indexes of {}", table))?;

        let mut indexes: Vec<IndexDef> = Vec::new();
        for row in rows {
            let name: String = row.try_get("index_name")?;
            let field: String = row.try_get("field")?;
            let direction = if row.try_get::<bool, _>("descending")? {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };

            match indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.fields.push(IndexField { field, direction }),
                None => indexes.push(IndexDef {
                    name,
                    unique: row.try_get("is_unique")?,
                    primary: row.try_get("is_primary")?,
                    fields: vec![IndexField { field, direction }],
                }),
            }
        }

        Ok(indexes)
    }

    async fn owned_sequences(&mut self, table: &str) -> Result<Vec<OwnedSequence>> {
        let rows = sqlx::query(SEQUENCES_QUERY)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to read sequences of {}", table))?;

        rows.iter()
            .map(|row| -> Result<OwnedSequence> {
                Ok(OwnedSequence {
                    column: row.try_get("column_name")?,
                    sequence: row.try_get("sequence_name")?,
                    data_type: row.try_get("sequence_type")?,
                    identity: row.try_get("identity")?,
                })
            })
            .collect()
    }

    async fn relation_exists(&mut self, name: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_class c
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname = $1 AND c.relname = $2
            ) AS found
            "#,
        )
        .bind(&self.schema)
        .bind(name)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("Failed to look up relation {}", name))?;

        Ok(row.try_get("found")?)
    }

    async fn is_constraint(&mut self, table: &str, name: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_constraint con
                JOIN pg_class t ON t.oid = con.conrelid
                JOIN pg_namespace n ON n.oid = t.relnamespace
                WHERE n.nspname = $1 AND t.relname = $2 AND con.conname = $3
            ) AS found
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .bind(name)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("Failed to look up constraint {} on {}", name, table))?;

        Ok(row.try_get("found")?)
    }
}

/// information_schema spells types out; definitions use the short names.
fn normalize_type(data_type: &str, udt_name: &str) -> String {
    match data_type {
        "character varying" => "varchar".to_string(),
        "character" => "char".to_string(),
        "timestamp without time zone" => "timestamp".to_string(),
        "timestamp with time zone" => "timestamptz".to_string(),
        "time without time zone" => "time".to_string(),
        "double precision" => "float8".to_string(),
        "USER-DEFINED" | "ARRAY" => udt_name.to_string(),
        other => other.to_string(),
    }
}

/// Recover the literal from a column default such as `'foo'::character varying` or `42`.
/// Expressions that are not literals are returned verbatim.
fn parse_default(expr: &str) -> String {
    if let Some(quoted) = expr.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                    continue;
                }
                return value;
            }
            value.push(c);
        }
        return expr.to_string();
    }

    let bare = expr.split("::").next().unwrap_or(expr);
    let bare = bare.trim_start_matches('(').trim_end_matches(')');
    if bare.parse::<f64>().is_ok() {
        bare.to_string()
    } else {
        expr.to_string()
    }
}

impl Driver for PgDriver {
    async fn table_names(&mut self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT tablename::text AS name FROM pg_tables WHERE schemaname = $1 ORDER BY tablename",
        )
        .bind(&self.schema)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list tables")?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(anyhow::Error::from))
            .collect()
    }

    async fn describe_table(&mut self, table: &str) -> Result<Option<TableDef>> {
        let mut fields = self.describe_fields(table).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let indexes = self.describe_indexes(table).await?;
        if let Some(primary) = indexes.iter().find(|i| i.primary) {
            for field in fields.iter_mut() {
                field.primary = primary.covers_field(&field.name);
            }
        }

        Ok(Some(TableDef::new(table, fields, indexes)))
    }

    async fn create_table(&mut self, table: &str, fields: &[FieldDef]) -> Result<()> {
        let sql = render_create_table(&self.schema, table, fields);
        self.execute(&format!("creating table {}", table), &sql).await
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        let sql = format!("DROP TABLE {};", self.table(table));
        self.execute(&format!("dropping table {}", table), &sql).await
    }

    /// Sequences still carrying the old table's name are renamed along with it.
    async fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        let action = format!("renaming table {} to {}", from, to);
        let sql = format!("ALTER TABLE {} RENAME TO {};", self.table(from), quote_ident(to));
        self.execute(&action, &sql).await?;

        for owned in self.owned_sequences(to).await? {
            if owned.sequence != sequence_name(from, &owned.column) {
                continue;
            }
            let renamed = sequence_name(to, &owned.column);
            if self.relation_exists(&renamed).await? {
                debug!(sequence = %owned.sequence, taken = %renamed, "Keeping sequence name");
                continue;
            }
            let sql = format!(
                "ALTER SEQUENCE {} RENAME TO {};",
                self.table(&owned.sequence),
                quote_ident(&renamed)
            );
            self.execute(&action, &sql).await?;
        }
        Ok(())
    }

    async fn copy_table(&mut self, from: &str, to: &str) -> Result<()> {
        let action = format!("copying table {} to {}", from, to);
        let source = self.table(from);
        let target = self.table(to);

        let create = format!("CREATE TABLE {} (LIKE {} INCLUDING ALL);", target, source);
        self.execute(&action, &create).await?;

        // identities get their own sequence from LIKE; serial defaults still point at the source's
        let source_sequences = self.owned_sequences(from).await?;
        for owned in source_sequences.iter().filter(|s| !s.identity) {
            let sequence = self.table(&sequence_name(to, &owned.column));
            let column = quote_ident(&owned.column);
            let create = format!(
                "CREATE SEQUENCE {} AS {} OWNED BY {}.{};",
                sequence, owned.data_type, target, column
            );
            self.execute(&action, &create).await?;
            let default = format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT nextval({}::regclass);",
                target,
                column,
                escape_string(&sequence)
            );
            self.execute(&action, &default).await?;
        }

        let insert = format!(
            "INSERT INTO {} OVERRIDING SYSTEM VALUE SELECT * FROM {};",
            target, source
        );
        self.execute(&action, &insert).await?;

        for copied in self.owned_sequences(to).await? {
            let Some(original) = source_sequences.iter().find(|s| s.column == copied.column) else {
                continue;
            };
            let resync = format!(
                "SELECT setval({}, last_value, is_called) FROM {};",
                escape_string(&self.table(&copied.sequence)),
                self.table(&original.sequence)
            );
            self.execute(&action, &resync).await?;
        }

        Ok(())
    }

    async fn add_field(&mut self, table: &str, field: &FieldDef) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.table(table),
            render_field(field)
        );
        self.execute(&format!("adding field {}.{}", table, field.name), &sql)
            .await
    }

    async fn alter_field(&mut self, table: &str, field: &FieldDef) -> Result<()> {
        let current = self
            .describe_fields(table)
            .await?
            .into_iter()
            .find(|f| f.name == field.name)
            .ok_or_else(|| anyhow!("Field {}.{} does not exist", table, field.name))?;

        match render_alter_field(&self.schema, table, &current, field) {
            Some(sql) => {
                self.execute(&format!("altering field {}.{}", table, field.name), &sql)
                    .await
            }
            None => {
                debug!(table, field = %field.name, "Field already matches");
                Ok(())
            }
        }
    }

    async fn drop_field(&mut self, table: &str, field: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.table(table),
            quote_ident(field)
        );
        self.execute(&format!("dropping field {}.{}", table, field), &sql)
            .await
    }

    async fn rename_field(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};",
            self.table(table),
            quote_ident(from),
            quote_ident(to)
        );
        self.execute(
            &format!("renaming field {}.{} to {}", table, from, to),
            &sql,
        )
        .await
    }

    async fn create_index(&mut self, table: &str, index: &IndexDef) -> Result<()> {
        let sql = render_create_index(&self.schema, table, index);
        self.execute(
            &format!("creating {} {} on {}", index.kind(), index.name, table),
            &sql,
        )
        .await
    }

    async fn drop_index(&mut self, table: &str, index: &IndexDef) -> Result<()> {
        let is_constraint = self.is_constraint(table, &index.name).await?;
        let sql = render_drop_index(&self.schema, table, index, is_constraint);
        self.execute(
            &format!("dropping {} {} on {}", index.kind(), index.name, table),
            &sql,
        )
        .await
    }

    async fn rename_index(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let sql = format!(
            "ALTER INDEX {} RENAME TO {};",
            self.table(from),
            quote_ident(to)
        );
        self.execute(
            &format!("renaming index {} on {} to {}", from, table, to),
            &sql,
        )
        .await
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query(FOREIGN_KEYS_QUERY)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to read foreign keys of {}", table))?;

        rows.iter()
            .map(|row| -> Result<ForeignKey> {
                Ok(ForeignKey {
                    name: row.try_get("name")?,
                    table: row.try_get("table_name")?,
                    references: row.try_get("referenced_table")?,
                    definition: row.try_get("definition")?,
                })
            })
            .collect()
    }

    async fn create_foreign_key(&mut self, key: &ForeignKey) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {};",
            self.table(&key.table),
            quote_ident(&key.name),
            key.definition
        );
        self.execute(
            &format!("creating foreign key {} on {}", key.name, key.table),
            &sql,
        )
        .await
    }

    async fn drop_foreign_key(&mut self, key: &ForeignKey) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            self.table(&key.table),
            quote_ident(&key.name)
        );
        self.execute(
            &format!("dropping foreign key {} on {}", key.name, key.table),
            &sql,
        )
        .await
    }
}
