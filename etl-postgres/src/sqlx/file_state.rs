use chrono::{DateTime, Utc};
use sqlx::{PgPool, prelude::FromRow};

/// A row from the `etl.file_state` table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FileStateRow {
    pub etl_name: String,
    pub file_path: String,
    /// Modification time in seconds since the Unix epoch.
    pub file_mtime: f64,
    pub file_size: i64,
    pub processed_time: DateTime<Utc>,
}

/// Fetches the stored state of one file of an ETL.
pub async fn get_file_state(
    pool: &PgPool,
    etl_name: &str,
    file_path: &str,
) -> sqlx::Result<Option<FileStateRow>> {
    let row = sqlx::query_as::<_, FileStateRow>(
        r#"
        select etl_name, file_path, file_mtime, file_size, processed_time
        from etl.file_state
        where etl_name = $1 and file_path = $2
        "#,
    )
    .bind(etl_name)
    .bind(file_path)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetches the stored states of all files of an ETL.
pub async fn get_file_states(pool: &PgPool, etl_name: &str) -> sqlx::Result<Vec<FileStateRow>> {
    let rows = sqlx::query_as::<_, FileStateRow>(
        r#"
        select etl_name, file_path, file_mtime, file_size, processed_time
        from etl.file_state
        where etl_name = $1
        order by file_path
        "#,
    )
    .bind(etl_name)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Inserts or replaces the state of a file, keeping a single row per `(etl_name, file_path)`.
pub async fn upsert_file_state(pool: &PgPool, row: &FileStateRow) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into etl.file_state (etl_name, file_path, file_mtime, file_size, processed_time)
        values ($1, $2, $3, $4, $5)
        on conflict (etl_name, file_path)
        do update set
            file_mtime = excluded.file_mtime,
            file_size = excluded.file_size,
            processed_time = excluded.processed_time,
            updated_at = now()
        "#,
    )
    .bind(&row.etl_name)
    .bind(&row.file_path)
    .bind(row.file_mtime)
    .bind(row.file_size)
    .bind(row.processed_time)
    .execute(pool)
    .await?;

    Ok(())
}

/// Deletes all file states of an ETL and returns how many rows were removed.
pub async fn delete_file_states(pool: &PgPool, etl_name: &str) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        delete from etl.file_state
        where etl_name = $1
        "#,
    )
    .bind(etl_name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
