//! OECD SDMX extraction: query catalog plus the extractor that runs each
//! query through the fallback planner and the sparse decoder.

use std::time::Duration;

use shared::{CountryDictionary, FlatRecord};

use crate::cube::Cube;
use crate::decoder::{decode, QualifierRule, UnknownQualifier};
use crate::planner::{run_plan, AttemptOutcome, Combination, FallbackPlan, PlanOutcome};
use crate::transport::JsonTransport;

const OBSERVATION_PARAMS: &str = "dimensionAtObservation=AllDimensions&format=jsondata";

/// Rendered in place of `{category}` when the query has no category axis.
const TOTAL_CATEGORY: &str = "_T";

const SHA_DATAFLOW: &str = "OECD.ELS.HD,DSD_SHA@DF_SHA,";
const SHA_KEY: &str = ".A.EXP_HEALTH.{unit}._T..{category}.._T...";

const PHARMA: &[&str] = &["HC51", "HC5_1", "HC.5.1"];
const HOSPITAL: &[&str] = &["HC3", "HC.3"];
const PREVENTION: &[&str] = &["HC6", "HC.6"];

const MEASUREMENT_METHOD: QualifierRule = QualifierRule {
    dimension_ids: &["MEASUREMENT_METHOD", "MEASURE_METHOD"],
    markers: &["MSRD", "SR"],
    labels: &[("MSRD", "measured"), ("SR", "self_reported")],
    unknown: UnknownQualifier::Lowercase,
};

const WAGE_LEVEL: QualifierRule = QualifierRule {
    dimension_ids: &[],
    markers: &["AW67", "_Z"],
    labels: &[("AW67", "aw67"), ("_Z", "total")],
    unknown: UnknownQualifier::Label("other"),
};

/// One indicator as published by an SDMX dataflow.
#[derive(Debug, Clone, Copy)]
pub struct SdmxQuery {
    pub indicator: &'static str,
    pub dataflow: &'static str,
    /// Series key; `{unit}` and `{category}` are filled per attempt.
    pub key_template: &'static str,
    pub start_period: Option<u16>,
    /// Unit candidates in fallback order.
    pub units: &'static [&'static str],
    /// Category candidates in fallback order.
    pub categories: &'static [&'static str],
    pub qualifiers: &'static [QualifierRule],
}

const fn sha(
    indicator: &'static str,
    unit: &'static [&'static str],
    categories: &'static [&'static str],
) -> SdmxQuery {
    SdmxQuery {
        indicator,
        dataflow: SHA_DATAFLOW,
        key_template: SHA_KEY,
        start_period: Some(2015),
        units: unit,
        categories,
        qualifiers: &[],
    }
}

pub const SDMX_CATALOG: &[SdmxQuery] = &[
    sha("health_expenditure_pct_gdp", &["PT_B1GQ"], &[]),
    sha("health_expenditure_per_capita_eur_ppp", &["EUR_PPP_PS"], &[]),
    sha("pharma_expenditure_per_capita_usd_ppp", &["USD_PPP_PS"], PHARMA),
    sha("pharma_expenditure_pct_total", &["PT_EXP_HLTH"], PHARMA),
    sha("hospital_expenditure_pct_total", &["PT_EXP_HLTH"], HOSPITAL),
    sha("prevention_expenditure_pct_total", &["PT_EXP_HLTH"], PREVENTION),
    SdmxQuery {
        indicator: "obesity_or_overweight_population",
        dataflow: "OECD.ELS.HD,DSD_HEALTH_LVNG@DF_HEALTH_LVNG_BW,",
        key_template: ".A..._T..MSRD+SR",
        start_period: Some(2010),
        units: &[],
        categories: &[],
        qualifiers: &[MEASUREMENT_METHOD],
    },
    sha("hospital_expenditure_per_capita_usd_ppp", &["USD_PPP_PS"], HOSPITAL),
    sha("pharma_expenditure_pct_gdp", &["PT_B1GQ"], PHARMA),
    sha("hospital_expenditure_pct_gdp", &["PT_B1GQ"], HOSPITAL),
    SdmxQuery {
        indicator: "ptr",
        dataflow: "OECD.ELS.JAI,DSD_TAXBEN_PTR@DF_PTRUB,1.0",
        key_template: "...AW67.C_C2..AW67+_Z..M2.YES.NO.NO...A",
        start_period: None,
        units: &[],
        categories: &[],
        qualifiers: &[WAGE_LEVEL],
    },
];

impl SdmxQuery {
    pub fn plan(&self) -> FallbackPlan {
        FallbackPlan::new(self.units, self.categories)
    }

    pub fn key(&self, combination: &Combination) -> String {
        self.key_template
            .replace("{unit}", combination.unit.as_deref().unwrap_or(""))
            .replace(
                "{category}",
                combination.category.as_deref().unwrap_or(TOTAL_CATEGORY),
            )
    }

    pub fn url(&self, base_url: &str, combination: &Combination) -> String {
        let mut url = format!(
            "{}/{}/{}?",
            base_url.trim_end_matches('/'),
            self.dataflow,
            self.key(combination)
        );
        if let Some(start) = self.start_period {
            url.push_str(&format!("startPeriod={}&", start));
        }
        url.push_str(OBSERVATION_PARAMS);
        url
    }
}

pub struct SdmxExtractor<'a> {
    transport: &'a dyn JsonTransport,
    base_url: &'a str,
    countries: &'a CountryDictionary,
    attempt_timeout: Duration,
}

impl<'a> SdmxExtractor<'a> {
    pub fn new(
        transport: &'a dyn JsonTransport,
        base_url: &'a str,
        countries: &'a CountryDictionary,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            base_url,
            countries,
            attempt_timeout,
        }
    }

    async fn attempt(&self, query: &SdmxQuery, combination: Combination) -> AttemptOutcome {
        let url = query.url(self.base_url, &combination);
        let doc = match self.transport.fetch_json(&url).await {
            Ok(doc) => doc,
            // The public endpoint answers NoResultsFound with 404.
            Err(e) if e.status() == Some(404) => return AttemptOutcome::Empty,
            Err(e) => return AttemptOutcome::Failed(e.into()),
        };
        let cube = match Cube::from_json(doc) {
            Ok(cube) => cube,
            Err(e) => return AttemptOutcome::Failed(e.into()),
        };

        let report = decode(&cube, query.indicator, query.qualifiers, self.countries);
        if report.dropped.total() > 0 {
            tracing::debug!(
                indicator = query.indicator,
                %combination,
                keys = report.keys_seen,
                dropped = ?report.dropped,
                "observations dropped while decoding"
            );
        }
        AttemptOutcome::from(report.records)
    }

    pub async fn fetch_indicator(&self, query: &SdmxQuery) -> PlanOutcome {
        let outcome = run_plan(&query.plan(), self.attempt_timeout, move |combination| {
            self.attempt(query, combination)
        })
        .await;
        outcome.log(query.indicator);
        outcome
    }

    /// Run every query in `catalog`; unavailable indicators contribute nothing.
    pub async fn extract_all(&self, catalog: &[SdmxQuery]) -> Vec<FlatRecord> {
        let mut records = Vec::new();
        let mut found = 0;
        for query in catalog {
            let outcome = self.fetch_indicator(query).await;
            if matches!(outcome, PlanOutcome::Found { .. }) {
                found += 1;
            }
            records.extend(outcome.into_records());
        }

        if records.is_empty() {
            tracing::warn!("sdmx extraction returned no rows");
        } else {
            tracing::info!(
                rows = records.len(),
                indicators = found,
                queries = catalog.len(),
                "sdmx extraction finished"
            );
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use serde_json::{json, Value};

    const BASE: &str = "https://sdmx.test/rest/data";

    fn combination(unit: Option<&str>, category: Option<&str>) -> Combination {
        Combination {
            unit: unit.map(str::to_string),
            category: category.map(str::to_string),
        }
    }

    fn query(indicator: &str) -> &'static SdmxQuery {
        SDMX_CATALOG
            .iter()
            .find(|q| q.indicator == indicator)
            .unwrap()
    }

    /// Data message from `("REF_AREA", "ESP,FRA")` style dimensions.
    fn message(dims: &[(&str, &str)], observations: Value) -> Value {
        let dims: Vec<Value> = dims
            .iter()
            .map(|(id, codes)| {
                json!({
                    "id": id,
                    "values": codes.split(',').map(|c| json!({ "id": c })).collect::<Vec<_>>()
                })
            })
            .collect();
        json!({
            "data": {
                "dataSets": [{ "observations": observations }],
                "structures": [{ "dimensions": { "observation": dims } }]
            }
        })
    }

    #[test]
    fn test_catalog_has_unique_indicators() {
        let mut names: Vec<&str> = SDMX_CATALOG.iter().map(|q| q.indicator).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), SDMX_CATALOG.len());
        assert_eq!(SDMX_CATALOG.len(), 11);
    }

    #[test]
    fn test_url_renders_total_category_sentinel() {
        let q = query("health_expenditure_pct_gdp");
        let url = q.url(BASE, &combination(Some("PT_B1GQ"), None));
        assert_eq!(
            url,
            "https://sdmx.test/rest/data/OECD.ELS.HD,DSD_SHA@DF_SHA,/.A.EXP_HEALTH.PT_B1GQ._T.._T.._T...\
             ?startPeriod=2015&dimensionAtObservation=AllDimensions&format=jsondata"
        );
    }

    #[test]
    fn test_url_without_start_period() {
        let q = query("ptr");
        let url = q.url("https://sdmx.test/rest/data/", &combination(None, None));
        assert!(url.starts_with(
            "https://sdmx.test/rest/data/OECD.ELS.JAI,DSD_TAXBEN_PTR@DF_PTRUB,1.0/...AW67.C_C2..AW67+_Z..M2.YES.NO.NO...A?"
        ));
        assert!(!url.contains("startPeriod"));
    }

    #[tokio::test]
    async fn test_fallback_moves_to_next_category() {
        let q = query("pharma_expenditure_per_capita_usd_ppp");
        let first = q.url(BASE, &combination(Some("USD_PPP_PS"), Some("HC51")));
        let second = q.url(BASE, &combination(Some("USD_PPP_PS"), Some("HC5_1")));
        let transport = FakeTransport::default().with_status(first.clone(), 404).with_json(
            second.clone(),
            message(
                &[("REF_AREA", "ESP,FRA"), ("TIME_PERIOD", "2020,2021")],
                json!({ "0:1": [8.5], "1:0": [9.0, null] }),
            ),
        );
        let countries = CountryDictionary::default();
        let extractor = SdmxExtractor::new(&transport, BASE, &countries, Duration::from_secs(1));

        let outcome = extractor.fetch_indicator(q).await;

        assert_eq!(transport.calls(), vec![first, second]);
        match outcome {
            PlanOutcome::Found {
                combination: c,
                records,
                ..
            } => {
                assert_eq!(c.category.as_deref(), Some("HC5_1"));
                assert_eq!(records.len(), 2);
                assert_eq!(records[0].country, "ESP");
                assert_eq!(records[0].year, 2021);
                assert_eq!(records[0].value, 8.5);
                assert_eq!(records[1].indicator, "pharma_expenditure_per_capita_usd_ppp");
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_fallbacks_are_unavailable() {
        let q = query("hospital_expenditure_pct_total");
        let transport = FakeTransport::default();
        let countries = CountryDictionary::default();
        let extractor = SdmxExtractor::new(&transport, BASE, &countries, Duration::from_secs(1));

        let outcome = extractor.fetch_indicator(q).await;
        assert!(matches!(outcome, PlanOutcome::Unavailable { attempts: 2, .. }));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_not_found_everywhere_is_no_data() {
        let q = query("prevention_expenditure_pct_total");
        let mut transport = FakeTransport::default();
        for &category in PREVENTION {
            let url = q.url(BASE, &combination(Some("PT_EXP_HLTH"), Some(category)));
            transport = transport.with_status(url, 404);
        }
        let countries = CountryDictionary::default();
        let extractor = SdmxExtractor::new(&transport, BASE, &countries, Duration::from_secs(1));

        let outcome = extractor.fetch_indicator(q).await;
        assert!(matches!(outcome, PlanOutcome::NoData { attempts: 2, failed: 0 }));
    }

    #[tokio::test]
    async fn test_obesity_split_by_measurement_method() {
        let q = query("obesity_or_overweight_population");
        let transport = FakeTransport::default().with_json(
            q.url(BASE, &combination(None, None)),
            message(
                &[
                    ("REF_AREA", "ITA"),
                    ("METHOD", "SR,MSRD"),
                    ("TIME_PERIOD", "2017"),
                ],
                json!({ "0:0:0": [46.0], "0:1:0": [49.5] }),
            ),
        );
        let countries = CountryDictionary::default();
        let extractor = SdmxExtractor::new(&transport, BASE, &countries, Duration::from_secs(1));

        let records = extractor.extract_all(std::slice::from_ref(q)).await;
        let names: Vec<(&str, f64)> = records
            .iter()
            .map(|r| (r.indicator.as_str(), r.value))
            .collect();
        assert_eq!(
            names,
            vec![
                ("obesity_or_overweight_population_measured", 49.5),
                ("obesity_or_overweight_population_self_reported", 46.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_extract_all_skips_unavailable_indicators() {
        let ok = query("health_expenditure_pct_gdp");
        let missing = query("health_expenditure_per_capita_eur_ppp");
        let transport = FakeTransport::default().with_json(
            ok.url(BASE, &combination(Some("PT_B1GQ"), None)),
            message(
                &[("TIME_PERIOD", "2016"), ("REF_AREA", "DEU")],
                json!({ "0:0": [11.1] }),
            ),
        );
        let countries = CountryDictionary::default();
        let extractor = SdmxExtractor::new(&transport, BASE, &countries, Duration::from_secs(1));

        let records = extractor.extract_all(&[*missing, *ok]).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].country, "DEU");
        assert_eq!(transport.calls().len(), 2);
    }
}
