use etl_config::shared::{PgConnectionConfig, TlsConfig};
use etl_postgres::sqlx::test_utils::{create_pg_database, drop_pg_database};
use etl_postgres::types::{TableName, quote_column};
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::migrations::apply_etl_migrations;

/// Schema holding the target tables created by tests.
pub const TEST_DATABASE_SCHEMA: &str = "test";

/// Creates a [`TableName`] in the test schema.
pub fn test_table_name(name: &str) -> TableName {
    TableName::new(TEST_DATABASE_SCHEMA, name)
}

/// Connection settings for a fresh database on the local test server.
///
/// Configuration is read from environment variables:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname (required)
/// - `TESTS_DATABASE_PORT`: Postgres server port (required)
/// - `TESTS_DATABASE_USERNAME`: Database user (required)
/// - `TESTS_DATABASE_PASSWORD`: Database password (optional)
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        // Unique per test so tests can run in parallel.
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::disabled(),
    }
}

/// An isolated database with the `etl` migrations applied, dropped on [`Drop`].
///
/// Requires a multi-threaded runtime since dropping blocks on the cleanup.
#[derive(Debug)]
pub struct TestDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// # Panics
    /// Panics if the database cannot be created or migrated.
    pub async fn new() -> Self {
        let config = local_pg_connection_config();
        let pool = create_pg_database(&config).await;

        apply_etl_migrations(&config)
            .await
            .expect("Failed to apply etl migrations");
        sqlx::query(&format!("create schema if not exists {TEST_DATABASE_SCHEMA}"))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");

        Self { config, pool }
    }

    /// Runs arbitrary SQL, typically to prepare a target table.
    ///
    /// # Panics
    /// Panics if the statement fails.
    pub async fn execute(&self, sql: &str) {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|err| panic!("Failed to execute `{sql}`: {err}"));
    }

    /// Counts the rows of `table`.
    pub async fn count_rows(&self, table: &TableName) -> i64 {
        sqlx::query(&format!(
            "select count(*) from {}",
            table.as_quoted_identifier()
        ))
        .fetch_one(&self.pool)
        .await
        .expect("Failed to count rows")
        .get(0)
    }

    /// Returns the values of `column` rendered as text, ordered by their text form.
    pub async fn column_as_text(&self, table: &TableName, column: &str) -> Vec<Option<String>> {
        sqlx::query(&format!(
            "select {column}::text from {table} order by 1 nulls last",
            column = quote_column(column),
            table = table.as_quoted_identifier()
        ))
        .fetch_all(&self.pool)
        .await
        .expect("Failed to read column")
        .into_iter()
        .map(|row| row.get(0))
        .collect()
    }

    /// Returns the values of `column` rendered as text, in the order of `order_column`.
    pub async fn column_ordered_by(
        &self,
        table: &TableName,
        column: &str,
        order_column: &str,
    ) -> Vec<Option<String>> {
        sqlx::query(&format!(
            "select {column}::text from {table} order by {order_column}",
            column = quote_column(column),
            table = table.as_quoted_identifier(),
            order_column = quote_column(order_column)
        ))
        .fetch_all(&self.pool)
        .await
        .expect("Failed to read column")
        .into_iter()
        .map(|row| row.get(0))
        .collect()
    }

    /// Returns the names of the indexes on `table`, sorted.
    pub async fn index_names(&self, table: &TableName) -> Vec<String> {
        sqlx::query_scalar(
            "select indexname::text from pg_indexes \
             where schemaname = $1 and tablename = $2 order by 1",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await
        .expect("Failed to list indexes")
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        tokio::task::block_in_place(move || {
            Handle::current().block_on(async move {
                self.pool.close().await;
                drop_pg_database(&self.config).await;
            });
        });
    }
}
