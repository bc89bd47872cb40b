//! Postgres connection and DDL helpers shared by both services.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool};

/// Connect a small pool; the pipeline runs sequentially so a few
/// connections are plenty.
pub async fn connect(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
}

/// Quote `schema.table` for interpolation into DDL/DML. Schema names are
/// validated as plain identifiers at config load.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("\"{}\".\"{}\"", schema, table)
}

pub async fn ensure_schema(pool: &PgPool, schema: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn table_exists<'e, E>(executor: E, schema: &str, table: &str) -> Result<bool, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT 1
        FROM information_schema.tables
        WHERE table_schema = $1 AND table_name = $2
        LIMIT 1
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}
