//! Staging load: one long-format table per source, upserted on the natural
//! key so re-running a source replaces its previous values.

use chrono::{DateTime, Utc};
use shared::db::{ensure_schema, qualified};
use shared::{FlatRecord, Source};
use sqlx::PgPool;

/// Rows per UNNEST statement.
pub const STAGING_CHUNK: usize = 10_000;

/// Column-major view of a record slice, bound as Postgres arrays.
#[derive(Debug, Default, PartialEq)]
pub struct StagingColumns {
    pub country: Vec<String>,
    pub year: Vec<i32>,
    pub indicator: Vec<String>,
    pub value: Vec<f64>,
}

impl StagingColumns {
    pub fn from_records(records: &[FlatRecord]) -> Self {
        let mut cols = Self {
            country: Vec::with_capacity(records.len()),
            year: Vec::with_capacity(records.len()),
            indicator: Vec::with_capacity(records.len()),
            value: Vec::with_capacity(records.len()),
        };
        for r in records {
            cols.country.push(r.country.clone());
            cols.year.push(r.year);
            cols.indicator.push(r.indicator.clone());
            cols.value.push(r.value);
        }
        cols
    }
}

pub struct StagingWriter<'a> {
    pool: &'a PgPool,
    schema: &'a str,
}

impl<'a> StagingWriter<'a> {
    pub fn new(pool: &'a PgPool, schema: &'a str) -> Self {
        Self { pool, schema }
    }

    pub async fn ensure_table(&self, source: Source) -> Result<(), sqlx::Error> {
        ensure_schema(self.pool, self.schema).await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                country   TEXT NOT NULL,
                year      INT NOT NULL,
                indicator TEXT NOT NULL,
                value     DOUBLE PRECISION NOT NULL,
                load_ts   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (country, year, indicator)
            )
            "#,
            qualified(self.schema, source.staging_table())
        ))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Upsert `records` into the source's staging table in one transaction.
    /// Returns the number of rows written.
    pub async fn load(&self, source: Source, records: &[FlatRecord]) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            tracing::warn!(%source, "nothing to stage");
            return Ok(0);
        }
        self.ensure_table(source).await?;

        let sql = upsert_sql(self.schema, source);
        let load_ts: DateTime<Utc> = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in records.chunks(STAGING_CHUNK) {
            let cols = StagingColumns::from_records(chunk);
            let result = sqlx::query(&sql)
                .bind(&cols.country)
                .bind(&cols.year)
                .bind(&cols.indicator)
                .bind(&cols.value)
                .bind(load_ts)
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;

        tracing::info!(
            %source,
            table = source.staging_table(),
            rows = written,
            "staging table loaded"
        );
        Ok(written)
    }
}

fn upsert_sql(schema: &str, source: Source) -> String {
    format!(
        r#"
        INSERT INTO {} (country, year, indicator, value, load_ts)
        SELECT t.country, t.year, t.indicator, t.value, $5
        FROM UNNEST($1::text[], $2::int4[], $3::text[], $4::float8[])
            AS t(country, year, indicator, value)
        ON CONFLICT (country, year, indicator)
        DO UPDATE SET value = EXCLUDED.value, load_ts = EXCLUDED.load_ts
        "#,
        qualified(schema, source.staging_table())
    )
}
