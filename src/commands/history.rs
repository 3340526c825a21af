//! pgshift history - read back the audit entries of a schema upgrade

use anyhow::Result;
use tracing::debug;

use crate::audit::{AuditEntry, AuditFilter, AuditLog, PgAuditLog};
use crate::config::Config;
use crate::db::connection::{connect_with_retry, mask_url_password};

/// Print the entries matching `filter`, oldest first. Returns false when there are none.
pub async fn cmd_history(config: &Config, filter: &AuditFilter, json: bool) -> Result<bool> {
    debug!(url = %mask_url_password(&config.database.url), "Connecting");
    let pool = connect_with_retry(&config.database.url).await?;
    let mut audit = PgAuditLog::new(pool, config.audit.table.clone());
    let entries = audit.query(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No audit entries for schema '{}'", filter.schema_name);
    } else {
        for entry in &entries {
            println!("{}", render_entry(entry));
        }
    }

    Ok(!entries.is_empty())
}

fn render_entry(entry: &AuditEntry) -> String {
    format!(
        "{}  {}  {} {} {:<12}  {:<16} {}",
        entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        entry.run_id,
        entry.key.schema_name,
        entry.key.version.as_deref().unwrap_or("-"),
        entry.key.timing.to_string(),
        entry.action.to_string(),
        entry.table.as_deref().unwrap_or("")
    )
    .trim_end()
    .to_string()
}
