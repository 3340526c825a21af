use anyhow::Result;
use pgshift::driver::PgDriver;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use uuid::Uuid;

/// Variable naming the server database-backed tests run against. Tests pass without running
/// when it is unset.
pub const TEST_DATABASE_URL: &str = "PGSHIFT_TEST_DATABASE_URL";

/// A schema of its own in the test database, dropped on cleanup.
pub struct TestSchema {
    pool: PgPool,
    schema: String,
    base_url: String,
}

impl TestSchema {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// A driver working inside the schema.
    pub async fn driver(&self) -> PgDriver {
        PgDriver::acquire(&self.pool, &self.schema).await.unwrap()
    }

    /// Execute arbitrary SQL with the schema first on the search path
    pub async fn execute(&self, sql: &str) {
        use sqlx::Executor;
        self.pool
            .execute(sql)
            .await
            .unwrap_or_else(|e| panic!("Failed to execute SQL: {}\nError: {}", sql, e));
    }

    pub async fn fetch_i64(&self, sql: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| panic!("Failed to fetch from SQL: {}\nError: {}", sql, e))
    }

    pub async fn fetch_text(&self, sql: &str) -> Option<String> {
        sqlx::query_scalar::<_, Option<String>>(sql)
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| panic!("Failed to fetch from SQL: {}\nError: {}", sql, e))
    }

    /// Best effort: drop the schema with everything in it
    pub async fn cleanup(self) {
        self.pool.close().await;

        let schema = self.schema.clone();
        let base_url = self.base_url.clone();
        let cleanup_future = async move {
            if let Ok(pool) = PgPool::connect(&base_url).await {
                let drop_sql = format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema);
                let _ = sqlx::query(&drop_sql).execute(&pool).await;
                pool.close().await;
            }
        };

        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), cleanup_future).await;
    }
}

async fn create_test_schema(base_url: &str) -> TestSchema {
    let schema = format!("test_{}", Uuid::new_v4().simple());

    let base_pool = PgPool::connect(base_url)
        .await
        .expect("Failed to connect to the test database");
    sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema))
        .execute(&base_pool)
        .await
        .expect("Failed to create test schema");
    base_pool.close().await;

    let options = PgConnectOptions::from_str(base_url)
        .expect("Invalid test database URL")
        .options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("Failed to connect to the test schema");

    TestSchema {
        pool,
        schema,
        base_url: base_url.to_string(),
    }
}

/// Run a test in a fresh schema and drop the schema afterwards.
///
/// Without a test database configured the test is skipped and passes.
///
/// ```ignore
/// #[tokio::test]
/// async fn copies_are_independent() -> Result<()> {
///     with_test_schema(async |db| {
///         db.execute("CREATE TABLE t (id serial PRIMARY KEY)").await;
///         let mut driver = db.driver().await;
///         // ...
///         Ok(())
///     })
///     .await
/// }
/// ```
pub async fn with_test_schema<F>(test_fn: F) -> Result<()>
where
    F: std::ops::AsyncFnOnce(&TestSchema) -> Result<()>,
{
    dotenv::dotenv().ok();
    let Ok(base_url) = std::env::var(TEST_DATABASE_URL) else {
        eprintln!("{} is not set, skipping database test", TEST_DATABASE_URL);
        return Ok(());
    };

    let db = create_test_schema(&base_url).await;
    let result = test_fn(&db).await;
    db.cleanup().await;

    result
}
