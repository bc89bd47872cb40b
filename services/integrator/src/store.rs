//! Postgres-backed fact store: reads the per-source staging tables and
//! upserts the merged fact table `<mart>.country_year_indicators`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::db::{ensure_schema, qualified, table_exists};
use shared::{FlatRecord, MergedRecord, Source};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use thiserror::Error;

use crate::merge::{FactStore, MergeSession};

pub const MART_TABLE: &str = "country_year_indicators";

/// Rows per UNNEST statement inside the commit transaction.
pub const MART_CHUNK: usize = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("merge session already committed")]
    SessionClosed,
}

pub struct PgFactStore {
    pool: PgPool,
    staging_schema: String,
    mart_schema: String,
}

impl PgFactStore {
    pub fn new(pool: PgPool, staging_schema: &str, mart_schema: &str) -> Self {
        Self {
            pool,
            staging_schema: staging_schema.to_string(),
            mart_schema: mart_schema.to_string(),
        }
    }

    fn mart_table(&self) -> String {
        qualified(&self.mart_schema, MART_TABLE)
    }

    /// Create the fact table and its lookup indexes when missing.
    pub async fn ensure_mart(&self) -> Result<(), StoreError> {
        ensure_schema(&self.pool, &self.mart_schema).await?;
        let table = self.mart_table();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                country   TEXT NOT NULL,
                year      INT NOT NULL,
                indicator TEXT NOT NULL,
                value     DOUBLE PRECISION NOT NULL,
                source    TEXT NOT NULL,
                load_ts   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT pk_mart_ind PRIMARY KEY (country, year, indicator)
            )
            "#,
            table
        ))
        .execute(&self.pool)
        .await?;

        for (name, columns) in [
            ("idx_mart_country_year", "country, year"),
            ("idx_mart_indicator", "indicator"),
        ] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                name, table, columns
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Total rows across the staging tables that exist.
    pub async fn staged_rows(&self) -> Result<i64, StoreError> {
        let mut total = 0;
        for source in Source::ALL {
            let table = source.staging_table();
            if !table_exists(&self.pool, &self.staging_schema, table).await? {
                continue;
            }
            let (rows,): (i64,) = sqlx::query_as(&count_sql(&self.staging_schema, table))
                .fetch_one(&self.pool)
                .await?;
            total += rows;
        }
        Ok(total)
    }
}

#[async_trait]
impl FactStore for PgFactStore {
    async fn collect(&self) -> Result<Vec<FlatRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        let records = read_staging(&mut tx, &self.staging_schema).await?;
        tx.rollback().await?;
        Ok(records)
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn MergeSession + 'a>, StoreError> {
        let mart_table = self.mart_table();
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        // Serializes concurrent merges; readers are not blocked. The snapshot
        // is taken by the first staging read, after the lock is granted.
        sqlx::query(&format!("LOCK TABLE {} IN SHARE ROW EXCLUSIVE MODE", mart_table))
            .execute(&mut *tx)
            .await?;
        tracing::debug!(table = %mart_table, "mart locked for merge");

        Ok(Box::new(PgMergeSession {
            tx: Some(tx),
            staging_schema: &self.staging_schema,
            mart_table,
        }))
    }
}

/// One merge under the mart lock. Dropping it before `commit` rolls back.
pub struct PgMergeSession<'a> {
    tx: Option<Transaction<'static, Postgres>>,
    staging_schema: &'a str,
    mart_table: String,
}

#[async_trait]
impl MergeSession for PgMergeSession<'_> {
    async fn collect(&mut self) -> Result<Vec<FlatRecord>, StoreError> {
        let tx = self.tx.as_mut().ok_or(StoreError::SessionClosed)?;
        Ok(read_staging(tx, self.staging_schema).await?)
    }

    async fn commit(&mut self, rows: &[MergedRecord]) -> Result<u64, StoreError> {
        let mut tx = self.tx.take().ok_or(StoreError::SessionClosed)?;
        let sql = upsert_sql(&self.mart_table);

        let mut written = 0;
        for chunk in rows.chunks(MART_CHUNK) {
            let cols = MartColumns::from_rows(chunk);
            let result = sqlx::query(&sql)
                .bind(&cols.country)
                .bind(&cols.year)
                .bind(&cols.indicator)
                .bind(&cols.value)
                .bind(&cols.source)
                .bind(&cols.load_ts)
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }
}

/// Every row of every existing staging table, tagged with its source.
async fn read_staging(conn: &mut PgConnection, schema: &str) -> Result<Vec<FlatRecord>, sqlx::Error> {
    let mut records = Vec::new();
    for source in Source::ALL {
        let table = source.staging_table();
        if !table_exists(&mut *conn, schema, table).await? {
            tracing::warn!(%source, schema, table, "staging table missing");
            continue;
        }

        let rows: Vec<(String, i32, String, f64)> = sqlx::query_as(&format!(
            r#"
            SELECT country, year, indicator, value
            FROM {}
            WHERE country IS NOT NULL AND year IS NOT NULL
              AND indicator IS NOT NULL AND value IS NOT NULL
            "#,
            qualified(schema, table)
        ))
        .fetch_all(&mut *conn)
        .await?;

        records.extend(
            rows.into_iter()
                .map(|(country, year, indicator, value)| {
                    FlatRecord::new(country, year, indicator, value, source)
                }),
        );
    }
    Ok(records)
}

fn count_sql(schema: &str, table: &str) -> String {
    format!("SELECT count(*) FROM {}", qualified(schema, table))
}

#[derive(Debug, Default, PartialEq)]
struct MartColumns {
    country: Vec<String>,
    year: Vec<i32>,
    indicator: Vec<String>,
    value: Vec<f64>,
    source: Vec<String>,
    load_ts: Vec<DateTime<Utc>>,
}

impl MartColumns {
    fn from_rows(rows: &[MergedRecord]) -> Self {
        let mut cols = Self::default();
        for r in rows {
            cols.country.push(r.country.clone());
            cols.year.push(r.year);
            cols.indicator.push(r.indicator.clone());
            cols.value.push(r.value);
            cols.source.push(r.source.as_str().to_string());
            cols.load_ts.push(r.load_ts);
        }
        cols
    }
}

/// Overwrite on conflict, with no change detection.
fn upsert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {} (country, year, indicator, value, source, load_ts)
        SELECT * FROM UNNEST(
            $1::text[], $2::int4[], $3::text[], $4::float8[], $5::text[], $6::timestamptz[]
        )
        ON CONFLICT (country, year, indicator)
        DO UPDATE SET value   = EXCLUDED.value,
                      source  = EXCLUDED.source,
                      load_ts = EXCLUDED.load_ts
        "#,
        table
    )
}
