//! Runs against a real server; skipped unless PGSHIFT_TEST_DATABASE_URL is set.

pub mod driver;
