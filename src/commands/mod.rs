pub mod changeset;
pub mod diff;
pub mod history;
pub mod run;
pub mod verify;

pub use changeset::{cmd_rename_field, cmd_rename_table};
pub use diff::cmd_diff;
pub use history::cmd_history;
pub use run::cmd_run;
pub use verify::cmd_verify;

use anyhow::Result;
use sqlx::PgPool;
use tracing::debug;

use crate::config::Config;
use crate::db::connection::{connect_with_retry, mask_url_password};
use crate::driver::{PgDriver, Prefixed};

/// Connect to the configured database and take the connection the command works on. Table
/// names the driver takes and returns are bare: the configured prefix is added underneath.
pub(crate) async fn open_driver(config: &Config) -> Result<(PgPool, Prefixed<PgDriver>)> {
    debug!(
        url = %mask_url_password(&config.database.url),
        prefix = %config.database.prefix,
        "Connecting"
    );
    let pool = connect_with_retry(&config.database.url).await?;
    let driver = PgDriver::acquire(&pool, &config.database.schema).await?;
    Ok((pool, Prefixed::new(driver, &config.database.prefix)))
}

/// Live tables the engine manages, from the bare names a prefixed driver lists: everything
/// except the audit table and backup copies.
pub(crate) fn managed_tables(config: &Config, names: Vec<String>) -> Vec<String> {
    let audit = &config.audit.table;
    let database = &config.database;
    names
        .into_iter()
        .filter(|name| {
            !(audit.schema == database.schema && format!("{}{}", database.prefix, name) == audit.name)
        })
        .filter(|name| !name.ends_with(&config.backup.suffix))
        .collect()
}
