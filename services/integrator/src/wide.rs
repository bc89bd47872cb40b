//! `<mart>.country_year_wide`: a fixed set of indicators pivoted to one
//! column each, one row per (country, year). Rebuilt from scratch each run.

use shared::db::{ensure_schema, qualified};
use sqlx::PgPool;

use crate::dim_country::DIM_COUNTRY_TABLE;
use crate::store::MART_TABLE;

pub const WIDE_TABLE: &str = "country_year_wide";

/// Pivoted indicators; each becomes a column of the same name.
pub const WIDE_INDICATORS: &[&str] = &[
    "population",
    "life_expectancy_total",
    "diabetes_prevalence_20_79",
    "gdp_per_capita_usd",
    "health_expenditure_pct_gdp",
    "health_expenditure_per_capita_usd",
    "pharma_expenditure_pct_total",
    "pharma_expenditure_per_capita_usd_ppp",
    "hospital_expenditure_pct_total",
    "prevention_expenditure_pct_total",
    "obesity_adults",
    "overweight_adults",
];

/// Statements run in order inside one transaction.
pub fn wide_statements(mart_schema: &str) -> Vec<String> {
    let wide = qualified(mart_schema, WIDE_TABLE);
    let pivot = WIDE_INDICATORS
        .iter()
        .map(|name| format!("MAX(CASE WHEN l.indicator = '{0}' THEN l.value END) AS \"{0}\"", name))
        .collect::<Vec<_>>()
        .join(",\n            ");

    vec![
        format!("DROP TABLE IF EXISTS {}", wide),
        format!(
            r#"
        CREATE TABLE {} AS
        SELECT
            d.iso3,
            d.country_name,
            l.year::INT AS year,
            {}
        FROM {} d
        JOIN {} l ON l.country = d.iso3
        GROUP BY d.iso3, d.country_name, l.year
        ORDER BY d.iso3, l.year
        "#,
            wide,
            pivot,
            qualified(mart_schema, DIM_COUNTRY_TABLE),
            qualified(mart_schema, MART_TABLE)
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_cyw_iso3_year ON {} (iso3, year)",
            wide
        ),
    ]
}

/// Drop and recreate the wide table atomically. Returns its row count.
pub async fn build_wide(pool: &PgPool, mart_schema: &str) -> Result<i64, sqlx::Error> {
    ensure_schema(pool, mart_schema).await?;
    let mut tx = pool.begin().await?;
    for statement in wide_statements(mart_schema) {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }
    let (rows,): (i64,) = sqlx::query_as(&format!(
        "SELECT count(*) FROM {}",
        qualified(mart_schema, WIDE_TABLE)
    ))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(rows, columns = WIDE_INDICATORS.len(), "country_year_wide rebuilt");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_pivot_column_per_indicator() {
        let statements = wide_statements("mart");
        assert_eq!(statements.len(), 3);
        let create = &statements[1];
        for name in WIDE_INDICATORS {
            assert!(create.contains(&format!("AS \"{}\"", name)), "missing {}", name);
        }
        assert!(create.contains("JOIN \"mart\".\"country_year_indicators\" l ON l.country = d.iso3"));
    }

    #[test]
    fn test_drop_precedes_create() {
        let statements = wide_statements("mart");
        assert!(statements[0].starts_with("DROP TABLE IF EXISTS \"mart\".\"country_year_wide\""));
        assert!(statements[1].contains("CREATE TABLE \"mart\".\"country_year_wide\" AS"));
    }
}
