use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Mask password in database URL for display
pub fn mask_url_password(url: &str) -> String {
    let Some((protocol, rest)) = url.split_once("://") else {
        return url.to_string();
    };

    if let Some((user_info, host_and_path)) = rest.split_once('@')
        && let Some((username, _)) = user_info.split_once(':')
    {
        return format!("{}://{}:***@{}", protocol, username, host_and_path);
    }

    url.to_string()
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Connect with retries for transient startup failures.
///
/// The pool holds two connections: one owned by the migration run from verification to commit or
/// rollback, one for the audit log.
pub async fn connect_with_retry(url: &str) -> Result<PgPool> {
    connect_with_retry_config(url, &ConnectionConfig::default()).await
}

pub async fn connect_with_retry_config(url: &str, config: &ConnectionConfig) -> Result<PgPool> {
    let mut attempt = 0;

    loop {
        let result = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await;

        match result {
            Ok(pool) => {
                if attempt > 0 {
                    info!(
                        "✅ Connected to database (after {} retr{})",
                        attempt,
                        if attempt == 1 { "y" } else { "ies" }
                    );
                } else {
                    info!("✅ Connected to database");
                }
                return Ok(pool);
            }
            Err(e) if attempt < config.max_retries => {
                if attempt == 0 {
                    info!("🔄 Database not ready, retrying...");
                }
                tracing::debug!(attempt, error = %e, "Connection attempt failed");
                attempt += 1;
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to connect to database at {} after {} attempts",
                        mask_url_password(url),
                        config.max_retries + 1
                    )
                });
            }
        }
    }
}
