use sqlx::PgExecutor;

use crate::types::{ColumnInfo, TableName};

/// Returns the columns of `table` ordered by their position.
///
/// An absent table yields an empty list.
pub async fn get_table_columns<'c, E>(executor: E, table: &TableName) -> sqlx::Result<Vec<ColumnInfo>>
where
    E: PgExecutor<'c>,
{
    let columns = sqlx::query_as::<_, ColumnInfo>(
        r#"
        select
            column_name::text as column_name,
            data_type::text as data_type,
            udt_name::text as udt_name,
            character_maximum_length::int4 as character_maximum_length,
            numeric_precision::int4 as numeric_precision,
            numeric_scale::int4 as numeric_scale,
            (is_identity = 'YES') as is_identity,
            ordinal_position::int4 as ordinal_position
        from information_schema.columns
        where table_schema = $1 and table_name = $2
        order by ordinal_position
        "#,
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_all(executor)
    .await?;

    Ok(columns)
}

/// Returns whether `table` exists.
pub async fn table_exists<'c, E>(executor: E, table: &TableName) -> sqlx::Result<bool>
where
    E: PgExecutor<'c>,
{
    let exists: bool = sqlx::query_scalar(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = $1 and table_name = $2
        )
        "#,
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}
