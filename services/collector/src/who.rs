//! WHO Global Health Observatory extraction.

use serde_json::Value;
use shared::{CountryDictionary, FlatRecord, Source};

use crate::normalize::{normalize_rows, object_rows, ColumnAliases};
use crate::transport::{JsonTransport, TransportError};

/// `(indicator, GHO code)` pairs.
pub const WHO_INDICATORS: &[(&str, &str)] = &[
    ("obesity_adults", "NCD_BMI_30A"),
    ("overweight_adults", "NCD_BMI_25A"),
    ("bmi_mean", "NCD_BMI_MEAN"),
    ("diabetes_prevalence", "NCD_DIABETES_PREVALENCE_AGESTD"),
    ("raised_fpg", "NCD_GLUC_04"),
    ("fpg_mean", "NCD_GLUC_01"),
    ("physical_inactivity", "NCD_PAA"),
    ("che_gdp_pct", "GHED_CHEGDP_SHA2011"),
    ("oop_share_che", "GHED_OOPSCHE_SHA2011"),
];

pub const GHO_COLUMNS: ColumnAliases = ColumnAliases {
    country: &["SpatialDim", "SpatialDimKey"],
    year: &["TimeDim", "TimeDimKey"],
    value: &["NumericValue", "Value"],
};

pub struct WhoExtractor<'a> {
    transport: &'a dyn JsonTransport,
    base_url: &'a str,
    countries: &'a CountryDictionary,
}

impl<'a> WhoExtractor<'a> {
    pub fn new(
        transport: &'a dyn JsonTransport,
        base_url: &'a str,
        countries: &'a CountryDictionary,
    ) -> Self {
        Self {
            transport,
            base_url,
            countries,
        }
    }

    pub async fn fetch_indicator(
        &self,
        indicator: &str,
        code: &str,
    ) -> Result<Vec<FlatRecord>, TransportError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), code);
        let doc = self.transport.fetch_json(&url).await?;
        let items = match doc {
            Value::Object(mut body) => match body.remove("value") {
                Some(Value::Array(items)) => items,
                None | Some(Value::Null) => Vec::new(),
                Some(_) => {
                    return Err(TransportError::Shape {
                        url,
                        reason: "`value` is not an array".to_string(),
                    })
                }
            },
            _ => {
                return Err(TransportError::Shape {
                    url,
                    reason: "body is not an object".to_string(),
                })
            }
        };

        Ok(normalize_rows(
            &object_rows(items),
            &GHO_COLUMNS,
            indicator,
            Source::Who,
            self.countries,
        ))
    }

    /// Fetch every indicator; one failing indicator does not stop the rest.
    pub async fn extract_all(&self, indicators: &[(&str, &str)]) -> Vec<FlatRecord> {
        tracing::info!(indicators = indicators.len(), "who extraction started");
        let mut records = Vec::new();
        for &(indicator, code) in indicators {
            match self.fetch_indicator(indicator, code).await {
                Ok(rows) if rows.is_empty() => {
                    tracing::info!(indicator, code, "no who rows");
                }
                Ok(rows) => {
                    tracing::debug!(indicator, rows = rows.len(), "who indicator fetched");
                    records.extend(rows);
                }
                Err(e) => tracing::error!(indicator, code, error = %e, "who indicator failed"),
            }
        }
        tracing::info!(rows = records.len(), "who extraction finished");
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use serde_json::json;

    const BASE: &str = "https://gho.test/api";

    #[tokio::test]
    async fn test_fetch_indicator_normalizes_rows() {
        let transport = FakeTransport::default().with_json(
            "https://gho.test/api/NCD_BMI_30A",
            json!({ "value": [
                { "SpatialDim": "ESP", "TimeDim": 2016, "NumericValue": 23.8, "Dim1": "SEX_BTSX" },
                { "SpatialDim": "ESP", "TimeDim": 2016, "NumericValue": 24.2, "Dim1": "SEX_MLE" },
                { "SpatialDim": "EUR", "TimeDim": 2016, "NumericValue": 23.3 },
                { "SpatialDim": "FRA", "TimeDim": 2016, "NumericValue": null }
            ]}),
        );
        let countries = CountryDictionary::default();
        let extractor = WhoExtractor::new(&transport, BASE, &countries);

        let records = extractor
            .fetch_indicator("obesity_adults", "NCD_BMI_30A")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].country, "ESP");
        assert!((records[0].value - 24.0).abs() < 1e-9);
        assert_eq!(records[0].source, Source::Who);
    }

    #[tokio::test]
    async fn test_missing_value_array_is_empty() {
        let transport =
            FakeTransport::default().with_json("https://gho.test/api/NCD_PAA", json!({}));
        let countries = CountryDictionary::default();
        let extractor = WhoExtractor::new(&transport, BASE, &countries);

        let records = extractor.fetch_indicator("physical_inactivity", "NCD_PAA").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_non_array_value_is_a_shape_error() {
        let transport = FakeTransport::default()
            .with_json("https://gho.test/api/NCD_PAA", json!({ "value": "nope" }));
        let countries = CountryDictionary::default();
        let extractor = WhoExtractor::new(&transport, BASE, &countries);

        let err = extractor
            .fetch_indicator("physical_inactivity", "NCD_PAA")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Shape { .. }));
    }

    #[tokio::test]
    async fn test_failing_indicator_is_skipped() {
        let transport = FakeTransport::default()
            .with_status("https://gho.test/api/NCD_BMI_30A", 500)
            .with_json(
                "https://gho.test/api/NCD_BMI_MEAN",
                json!({ "value": [{ "SpatialDimKey": "ITA", "TimeDimKey": "2010", "Value": "25.9" }] }),
            );
        let countries = CountryDictionary::default();
        let extractor = WhoExtractor::new(&transport, BASE, &countries);

        let records = extractor
            .extract_all(&[("obesity_adults", "NCD_BMI_30A"), ("bmi_mean", "NCD_BMI_MEAN")])
            .await;
        assert_eq!(records, vec![FlatRecord::new("ITA", 2010, "bmi_mean", 25.9, Source::Who)]);
        assert_eq!(transport.calls().len(), 2);
    }
}
