use etl_config::shared::{ETL_MIGRATION_OPTIONS, IntoConnectOptions, PgConnectionConfig};
use sqlx::{Executor, postgres::PgPoolOptions};
use tracing::info;

use crate::error::EtlResult;

/// Applies the migrations of the `etl` schema, which holds the processed file states.
///
/// The `_sqlx_migrations` bookkeeping table is created inside `etl` as well so the schema
/// of the target tables stays untouched.
pub async fn apply_etl_migrations(connection_config: &PgConnectionConfig) -> EtlResult<()> {
    let options = connection_config.with_db(Some(&*ETL_MIGRATION_OPTIONS));

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists etl;").await?;
                conn.execute("set search_path = 'etl';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying etl migrations");

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await?;
    pool.close().await;

    info!("etl migrations successfully applied");

    Ok(())
}
