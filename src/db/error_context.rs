//! Error context for PostgreSQL errors raised by driver statements.

use sqlx::postgres::{PgDatabaseError, PgErrorPosition};

#[derive(Debug, Clone)]
pub struct SqlErrorContext {
    pub message: String,
    /// Line within the statement, converted from PostgreSQL's character position
    pub line_number: Option<usize>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// SQLSTATE, e.g. "23505" for unique_violation
    pub code: Option<String>,
}

impl SqlErrorContext {
    pub fn from_sqlx_error(error: &sqlx::Error, statement: &str) -> Self {
        if let Some(db_error) = error.as_database_error()
            && let Some(pg_error) = db_error.try_downcast_ref::<PgDatabaseError>()
        {
            let line_number = pg_error
                .position()
                .map(|pos| match pos {
                    PgErrorPosition::Original(p) => p,
                    PgErrorPosition::Internal { position, .. } => position,
                })
                .map(|p| position_to_line(statement, p));

            return Self {
                message: pg_error.message().to_string(),
                line_number,
                detail: pg_error.detail().map(|s| s.to_string()),
                hint: pg_error.hint().map(|s| s.to_string()),
                code: Some(pg_error.code().to_string()),
            };
        }

        Self {
            message: error.to_string(),
            line_number: None,
            detail: None,
            hint: None,
            code: None,
        }
    }

    /// Format for display; `action` describes what the statement was doing, e.g. "renaming table
    /// users".
    pub fn format(&self, action: &str, statement: &str) -> String {
        let mut msg = format!("SQL error while {}", action);
        if let Some(code) = &self.code {
            msg.push_str(&format!(" [{}]", code));
        }
        msg.push_str(&format!(": {}", self.message));

        if let Some(detail) = &self.detail {
            msg.push_str(&format!("\n  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            msg.push_str(&format!("\n  Hint: {}", hint));
        }

        match self.line_number {
            Some(line) if statement.lines().count() > 1 => {
                msg.push_str(&format!("\n\n{}", format_line_context(statement, line)));
            }
            _ => msg.push_str(&format!("\n  Statement: {}", statement)),
        }

        msg
    }
}

/// Convert a 1-indexed character position to a line number.
pub fn position_to_line(content: &str, position: usize) -> usize {
    content
        .chars()
        .take(position.saturating_sub(1))
        .filter(|c| *c == '\n')
        .count()
        + 1
}

/// The statement's lines with a marker on `error_line`.
pub fn format_line_context(content: &str, error_line: usize) -> String {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| {
            let line_num = idx + 1;
            let marker = if line_num == error_line { ">" } else { " " };
            format!("  {} {:4} | {}", marker, line_num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
