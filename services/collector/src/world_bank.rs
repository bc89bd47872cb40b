//! World Bank indicator extraction (paged v2 API).

use serde_json::{Map, Value};
use shared::{CountryDictionary, FlatRecord, Source};

use crate::normalize::{normalize_rows, object_rows, ColumnAliases};
use crate::transport::{JsonTransport, TransportError};

const DATE_RANGE: &str = "1960:2024";
const PER_PAGE: u32 = 1000;

/// `(indicator, World Bank code)` pairs.
pub const WB_INDICATORS: &[(&str, &str)] = &[
    ("population", "SP.POP.TOTL"),
    ("rural_population_pct", "SP.RUR.TOTL.ZS"),
    ("population_15_64_pct", "SP.POP.1564.TO.ZS"),
    ("population_65_plus_pct", "SP.POP.65UP.TO.ZS"),
    ("life_expectancy_total", "SP.DYN.LE00.IN"),
    ("life_expectancy_female", "SP.DYN.LE00.FE.IN"),
    ("life_expectancy_male", "SP.DYN.LE00.MA.IN"),
    ("under5_mortality_rate", "SH.DYN.MORT"),
    ("malnutrition_prevalence_under5", "SH.STA.MALN.ZS"),
    ("diabetes_prevalence_20_79", "SH.STA.DIAB.ZS"),
    ("overweight_prevalence_under5", "SH.STA.OWGH.ZS"),
    ("gdp_usd", "NY.GDP.MKTP.CD"),
    ("gdp_per_capita_usd", "NY.GDP.PCAP.CD"),
    ("health_expenditure_pct_gdp", "SH.XPD.CHEX.GD.ZS"),
    ("health_expenditure_per_capita_usd", "SH.XPD.CHEX.PC.CD"),
    ("gini_index", "SI.POV.GINI"),
    ("poverty_headcount_320_day", "SI.POV.LMIC.GP"),
    ("adult_literacy_rate", "SE.ADT.LITR.ZS"),
    ("unemployment_rate", "SL.UEM.TOTL.ZS"),
];

pub const WB_COLUMNS: ColumnAliases = ColumnAliases {
    country: &["countryiso3code"],
    year: &["date"],
    value: &["value"],
};

pub struct WorldBankExtractor<'a> {
    transport: &'a dyn JsonTransport,
    base_url: &'a str,
    countries: &'a CountryDictionary,
    country_segment: String,
}

impl<'a> WorldBankExtractor<'a> {
    pub fn new(
        transport: &'a dyn JsonTransport,
        base_url: &'a str,
        countries: &'a CountryDictionary,
    ) -> Self {
        Self {
            transport,
            base_url,
            countries,
            country_segment: countries.codes().collect::<Vec<_>>().join(";"),
        }
    }

    pub fn page_url(&self, code: &str, page: u32) -> String {
        format!(
            "{}/country/{}/indicator/{}?format=json&date={}&per_page={}&page={}",
            self.base_url.trim_end_matches('/'),
            self.country_segment,
            code,
            DATE_RANGE,
            PER_PAGE,
            page
        )
    }

    /// Walk pages until the last one or an empty page.
    async fn fetch_pages(&self, code: &str) -> Result<Vec<Map<String, Value>>, TransportError> {
        let mut rows = Vec::new();
        let mut page = 1;
        loop {
            let url = self.page_url(code, page);
            let parts = match self.transport.fetch_json(&url).await? {
                Value::Array(parts) => parts,
                _ => {
                    return Err(TransportError::Shape {
                        url,
                        reason: "body is not an array".to_string(),
                    })
                }
            };

            // An error payload is a single message element.
            let mut parts = parts.into_iter();
            let meta = parts.next();
            let Some(Value::Array(items)) = parts.next() else {
                break;
            };
            if items.is_empty() {
                break;
            }
            rows.extend(object_rows(items));

            let pages = meta
                .as_ref()
                .and_then(|m| m.get("pages"))
                .and_then(Value::as_u64)
                .unwrap_or(1);
            if u64::from(page) >= pages {
                break;
            }
            page += 1;
        }
        Ok(rows)
    }

    pub async fn fetch_indicator(
        &self,
        indicator: &str,
        code: &str,
    ) -> Result<Vec<FlatRecord>, TransportError> {
        let rows = self.fetch_pages(code).await?;
        Ok(normalize_rows(
            &rows,
            &WB_COLUMNS,
            indicator,
            Source::WorldBank,
            self.countries,
        ))
    }

    /// Fetch every indicator; one failing indicator does not stop the rest.
    pub async fn extract_all(&self, indicators: &[(&str, &str)]) -> Vec<FlatRecord> {
        tracing::info!(indicators = indicators.len(), "world bank extraction started");
        let mut records = Vec::new();
        for &(indicator, code) in indicators {
            match self.fetch_indicator(indicator, code).await {
                Ok(rows) if rows.is_empty() => tracing::warn!(indicator, "no world bank rows"),
                Ok(rows) => {
                    tracing::info!(indicator, rows = rows.len(), "world bank indicator fetched");
                    records.extend(rows);
                }
                Err(e) => tracing::error!(indicator, code, error = %e, "world bank indicator failed"),
            }
        }
        tracing::info!(rows = records.len(), "world bank extraction finished");
        records
    }
}
