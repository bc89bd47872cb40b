//! `<mart>.dim_country`: one row per dictionary country.

use shared::db::{ensure_schema, qualified};
use shared::CountryDictionary;
use sqlx::PgPool;

pub const DIM_COUNTRY_TABLE: &str = "dim_country";

/// `(iso3, upper-cased name)` rows in code order.
pub fn country_rows(countries: &CountryDictionary) -> (Vec<String>, Vec<String>) {
    countries
        .entries()
        .map(|(code, name)| (code.to_string(), name.to_uppercase()))
        .unzip()
}

/// Create and upsert the dimension in one transaction. Returns rows written.
pub async fn build_dim_country(
    pool: &PgPool,
    mart_schema: &str,
    countries: &CountryDictionary,
) -> Result<u64, sqlx::Error> {
    let (codes, names) = country_rows(countries);
    if codes.is_empty() {
        tracing::warn!("country dictionary is empty, dim_country not built");
        return Ok(0);
    }

    ensure_schema(pool, mart_schema).await?;
    let table = qualified(mart_schema, DIM_COUNTRY_TABLE);

    let mut tx = pool.begin().await?;
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            iso3         CHAR(3) PRIMARY KEY,
            country_name TEXT NOT NULL
        )
        "#,
        table
    ))
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(&format!(
        r#"
        INSERT INTO {} (iso3, country_name)
        SELECT * FROM UNNEST($1::text[], $2::text[])
        ON CONFLICT (iso3) DO UPDATE SET country_name = EXCLUDED.country_name
        "#,
        table
    ))
    .bind(&codes)
    .bind(&names)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(table = %table, rows = result.rows_affected(), "dim_country built");
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_upper_cased() {
        let dict = CountryDictionary::from_pairs([("Spain", "ESP"), ("United Kingdom", "GBR")]);
        let (codes, names) = country_rows(&dict);
        assert_eq!(codes, vec!["ESP", "GBR"]);
        assert_eq!(names, vec!["SPAIN", "UNITED KINGDOM"]);
    }
}
