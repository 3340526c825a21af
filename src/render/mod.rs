//! PostgreSQL DDL rendering for the structural operations issued by the engine.
use itertools::Itertools;

use crate::definition::{FieldDef, IndexDef};

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn escape_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Column definition as used in CREATE TABLE and ADD COLUMN.
pub fn render_field(field: &FieldDef) -> String {
    let mut sql = format!("{} {}", quote_ident(&field.name), field.sql_type());

    if field.autoincrement {
        sql.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    } else if let Some(default) = &field.default {
        sql.push_str(&format!(" DEFAULT {}", escape_string(default)));
    }

    if !field.nullable {
        sql.push_str(" NOT NULL");
    }

    sql
}

pub fn render_create_table(schema: &str, table: &str, fields: &[FieldDef]) -> String {
    let columns = fields
        .iter()
        .map(|f| format!("    {}", render_field(f)))
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n);", qualified(schema, table), columns)
}

/// A single ALTER TABLE statement moving `current` to `target`, or `None` when they already
/// agree on everything the column itself stores.
pub fn render_alter_field(
    schema: &str,
    table: &str,
    current: &FieldDef,
    target: &FieldDef,
) -> Option<String> {
    let column = quote_ident(&target.name);
    let mut actions = Vec::new();

    if current.autoincrement && !target.autoincrement {
        actions.push(format!("ALTER COLUMN {} DROP IDENTITY IF EXISTS", column));
    }

    if current.sql_type() != target.sql_type() {
        actions.push(format!(
            "ALTER COLUMN {} TYPE {} USING {}::{}",
            column,
            target.sql_type(),
            column,
            target.sql_type()
        ));
    }

    if !target.autoincrement && current.default != target.default {
        match &target.default {
            Some(default) => actions.push(format!(
                "ALTER COLUMN {} SET DEFAULT {}",
                column,
                escape_string(default)
            )),
            None => actions.push(format!("ALTER COLUMN {} DROP DEFAULT", column)),
        }
    }

    match (current.nullable, target.nullable) {
        (true, false) => actions.push(format!("ALTER COLUMN {} SET NOT NULL", column)),
        (false, true) => actions.push(format!("ALTER COLUMN {} DROP NOT NULL", column)),
        _ => {}
    }

    if !current.autoincrement && target.autoincrement {
        if current.default.is_some() {
            actions.push(format!("ALTER COLUMN {} DROP DEFAULT", column));
        }
        actions.push(format!(
            "ALTER COLUMN {} ADD GENERATED BY DEFAULT AS IDENTITY",
            column
        ));
    }

    if actions.is_empty() {
        return None;
    }

    Some(format!(
        "ALTER TABLE {} {};",
        qualified(schema, table),
        actions.join(", ")
    ))
}

/// Primary keys become constraints, unique and plain indexes become indexes. Primary key
/// constraints cannot carry sort directions, so those are dropped for them.
pub fn render_create_index(schema: &str, table: &str, index: &IndexDef) -> String {
    if index.primary {
        let columns = index.fields.iter().map(|c| quote_ident(&c.field)).join(", ");
        return format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
            qualified(schema, table),
            quote_ident(&index.name),
            columns
        );
    }

    let columns = index
        .fields
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.field), c.direction))
        .join(", ");
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        qualified(schema, table),
        columns
    )
}

/// `is_constraint` tells whether the index backs a table constraint.
pub fn render_drop_index(schema: &str, table: &str, index: &IndexDef, is_constraint: bool) -> String {
    if index.primary || is_constraint {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            qualified(schema, table),
            quote_ident(&index.name)
        )
    } else {
        format!("DROP INDEX {};", qualified(schema, &index.name))
    }
}
