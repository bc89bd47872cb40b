//! Per-source normalizer.
//!
//! Responsibilities:
//! - Map each source's field names onto the canonical record shape using a
//!   first-present-wins alias list per field
//! - Canonicalize countries to ISO3 through the dictionary
//! - Coerce year/value, dropping rows that do not coerce
//! - Collapse duplicate (country, year, indicator) keys by arithmetic mean
//! - Apply the `YEAR_MIN` floor

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use shared::{CountryDictionary, FlatRecord, Source};

/// Candidate field names for each mandatory canonical field.
#[derive(Debug, Clone, Copy)]
pub struct ColumnAliases {
    pub country: &'static [&'static str],
    pub year: &'static [&'static str],
    pub value: &'static [&'static str],
}

impl ColumnAliases {
    /// Pick one field name per canonical field. The first alias present in
    /// any row wins. `None` when a mandatory field has no alias present.
    fn resolve(
        &self,
        rows: &[Map<String, Value>],
    ) -> Option<(&'static str, &'static str, &'static str)> {
        let pick = |aliases: &'static [&'static str]| {
            aliases
                .iter()
                .copied()
                .find(|alias| rows.iter().any(|row| row.contains_key(*alias)))
        };
        Some((pick(self.country)?, pick(self.year)?, pick(self.value)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub rows_in: usize,
    pub unknown_country: usize,
    pub uncoercible: usize,
    pub collapsed: usize,
}

/// Normalize one extraction call's raw rows. Indicator identity comes from
/// the call, not from any row field.
pub fn normalize_rows(
    rows: &[Map<String, Value>],
    aliases: &ColumnAliases,
    indicator: &str,
    source: Source,
    countries: &CountryDictionary,
) -> Vec<FlatRecord> {
    let mut stats = NormalizeStats {
        rows_in: rows.len(),
        ..Default::default()
    };
    if rows.is_empty() {
        return Vec::new();
    }

    let Some((country_col, year_col, value_col)) = aliases.resolve(rows) else {
        tracing::warn!(
            indicator,
            %source,
            rows = rows.len(),
            "mandatory column missing, treating output as empty"
        );
        return Vec::new();
    };

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(country) = row
            .get(country_col)
            .and_then(Value::as_str)
            .and_then(|raw| countries.canonicalize(raw))
        else {
            stats.unknown_country += 1;
            continue;
        };
        let (Some(year), Some(value)) = (
            row.get(year_col).and_then(coerce_year),
            row.get(value_col).and_then(coerce_value),
        ) else {
            stats.uncoercible += 1;
            continue;
        };
        records.push(FlatRecord::new(country, year, indicator, value, source));
    }

    let before = records.len();
    let records = dedupe_mean(records);
    stats.collapsed = before - records.len();

    tracing::debug!(indicator, %source, rows = records.len(), ?stats, "normalized");
    records
}

/// Average records sharing a (country, year, indicator) key. Output is
/// sorted by (indicator, country, year). The first record's source is kept.
pub fn dedupe_mean(records: Vec<FlatRecord>) -> Vec<FlatRecord> {
    let mut groups: BTreeMap<(String, String, i32), (f64, u32, Source)> = BTreeMap::new();
    for r in records {
        let entry = groups
            .entry((r.indicator, r.country, r.year))
            .or_insert((0.0, 0, r.source));
        entry.0 += r.value;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|((indicator, country, year), (sum, count, source))| {
            FlatRecord::new(country, year, indicator, sum / f64::from(count), source)
        })
        .collect()
}

/// Keep the object elements of a JSON array payload.
pub fn object_rows(items: Vec<Value>) -> Vec<Map<String, Value>> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// Final per-source pass: dedupe, then drop years before `year_min`.
pub fn finalize(records: Vec<FlatRecord>, year_min: i32) -> Vec<FlatRecord> {
    let mut out = dedupe_mean(records);
    out.retain(|r| r.year >= year_min);
    out
}

fn coerce_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_value(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}
