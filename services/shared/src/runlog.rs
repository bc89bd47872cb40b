//! Step bookkeeping in `<staging>.run_log`.
//!
//! Every pipeline step records start/end, status and row counts. Rows from
//! the collector and the integrator share a `run_id` when both are started
//! with the same `--run-id`.

use std::future::Future;
use std::time::Instant;

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{ensure_schema, qualified};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Ok,
    Error,
}

impl StepStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunLog {
    pool: PgPool,
    schema: String,
    run_id: Uuid,
}

impl RunLog {
    pub fn new(pool: PgPool, schema: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            pool,
            schema: schema.into(),
            run_id,
        }
    }

    fn table(&self) -> String {
        qualified(&self.schema, "run_log")
    }

    pub async fn ensure_table(&self) -> Result<(), sqlx::Error> {
        ensure_schema(&self.pool, &self.schema).await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id        BIGSERIAL PRIMARY KEY,
                run_id    UUID NOT NULL,
                step      TEXT NOT NULL,
                start_ts  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                end_ts    TIMESTAMPTZ,
                status    TEXT CHECK (status IN ('OK', 'ERROR')),
                rows_in   BIGINT,
                rows_out  BIGINT,
                error_msg TEXT
            )
            "#,
            self.table()
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Open a step row, returning its id.
    pub async fn start_step(&self, step: &str, rows_in: Option<i64>) -> Result<i64, sqlx::Error> {
        let (id,): (i64,) = sqlx::query_as(&format!(
            "INSERT INTO {} (run_id, step, start_ts, rows_in) VALUES ($1, $2, NOW(), $3) RETURNING id",
            self.table()
        ))
        .bind(self.run_id)
        .bind(step)
        .bind(rows_in)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn finish_step(
        &self,
        id: i64,
        status: StepStatus,
        rows_out: Option<i64>,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            r#"
            UPDATE {}
            SET end_ts = NOW(), status = $2, rows_out = $3, error_msg = $4
            WHERE id = $1
            "#,
            self.table()
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(rows_out)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Run `step` and record it in `log` when one is given (`None` in dry runs).
/// `rows_out` reads the output row count from the step's result. A failed
/// step is recorded as `ERROR` and its error is returned unchanged.
pub async fn tracked<T, Fut, R>(
    log: Option<&RunLog>,
    step: &str,
    rows_in: Option<i64>,
    rows_out: R,
    work: Fut,
) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
    R: FnOnce(&T) -> i64,
{
    let started = Instant::now();
    let id = match log {
        Some(log) => Some(log.start_step(step, rows_in).await?),
        None => None,
    };
    tracing::info!(step, rows_in, "step started");

    let result = work.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(value) => {
            let rows = rows_out(value);
            tracing::info!(step, rows_out = rows, elapsed_ms, "step finished");
            if let (Some(log), Some(id)) = (log, id) {
                log.finish_step(id, StepStatus::Ok, Some(rows), None).await?;
            }
        }
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::error!(step, elapsed_ms, error = %message, "step failed");
            if let (Some(log), Some(id)) = (log, id) {
                if let Err(log_err) = log
                    .finish_step(id, StepStatus::Error, None, Some(&message))
                    .await
                {
                    tracing::warn!(step, error = %log_err, "could not record step failure");
                }
            }
        }
    }
    result
}
