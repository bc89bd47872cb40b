//! Sparse cube decoder: observation keys -> flat country/year records.
//!
//! Decoding never fails. Every key that cannot be turned into a record is
//! counted in [`DropCounts`] and skipped, so
//! `keys_seen == records.len() + dropped.total()` always holds.

use serde_json::Value;
use shared::{CountryDictionary, FlatRecord, Source};

use crate::cube::{Cube, DimensionIndex};

/// Structural ids accepted for the country dimension, in preference order.
pub const COUNTRY_DIMENSION_IDS: &[&str] = &["REF_AREA", "COUNTRY", "LOCATION"];
/// Structural ids accepted for the time dimension, in preference order.
pub const TIME_DIMENSION_IDS: &[&str] = &["TIME_PERIOD", "TIME", "YEAR"];

/// Label used when a lower-casing qualifier cannot be located in the response.
const UNRESOLVED_QUALIFIER_LABEL: &str = "unknown";

/// What to do with a qualifier code that has no configured label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownQualifier {
    /// Synthesize the label from the code, lower-cased.
    Lowercase,
    /// Use a fixed label.
    Label(&'static str),
}

/// A sub-category dimension whose code suffixes the indicator name.
#[derive(Debug, Clone, Copy)]
pub struct QualifierRule {
    /// Structural ids tried first.
    pub dimension_ids: &'static [&'static str],
    /// Codes identifying the dimension by content when no id matches.
    pub markers: &'static [&'static str],
    /// `(code, label)` pairs.
    pub labels: &'static [(&'static str, &'static str)],
    pub unknown: UnknownQualifier,
}

impl QualifierRule {
    pub fn label_for(&self, code: &str) -> String {
        self.labels
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, label)| label.to_string())
            .unwrap_or_else(|| match self.unknown {
                UnknownQualifier::Lowercase => code.to_lowercase(),
                UnknownQualifier::Label(label) => label.to_string(),
            })
    }

    /// Label for every record when the dimension is absent from the response.
    pub fn unresolved_label(&self) -> &'static str {
        match self.unknown {
            UnknownQualifier::Lowercase => UNRESOLVED_QUALIFIER_LABEL,
            UnknownQualifier::Label(label) => label,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropCounts {
    /// Country or time dimension missing from the response.
    pub unresolved_layout: usize,
    /// Key segment missing or not an integer.
    pub malformed_key: usize,
    /// Index past the end of its dimension's value list.
    pub out_of_range: usize,
    /// Time code that is not a year.
    pub bad_period: usize,
    /// Country code absent from the dictionary.
    pub unknown_country: usize,
    /// Null, non-numeric or non-finite first slot.
    pub missing_value: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.unresolved_layout
            + self.malformed_key
            + self.out_of_range
            + self.bad_period
            + self.unknown_country
            + self.missing_value
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub records: Vec<FlatRecord>,
    pub keys_seen: usize,
    pub dropped: DropCounts,
}

enum QualifierSlot<'a> {
    Resolved(&'a QualifierRule, &'a DimensionIndex),
    Unresolved(&'a QualifierRule),
}

enum KeyError {
    Malformed,
    OutOfRange,
}

/// Decode every observation of `cube` into records for `indicator`.
pub fn decode(
    cube: &Cube,
    indicator: &str,
    qualifiers: &[QualifierRule],
    countries: &CountryDictionary,
) -> DecodeReport {
    let mut report = DecodeReport {
        keys_seen: cube.observations.len(),
        ..Default::default()
    };

    let layout = &cube.layout;
    let (Some(area), Some(time)) = (
        layout.resolve(COUNTRY_DIMENSION_IDS).resolved(),
        layout.resolve(TIME_DIMENSION_IDS).resolved(),
    ) else {
        report.dropped.unresolved_layout = report.keys_seen;
        return report;
    };

    let mut taken = vec![area.position, time.position];
    let mut slots = Vec::with_capacity(qualifiers.len());
    for rule in qualifiers {
        let dim = layout
            .resolve(rule.dimension_ids)
            .resolved()
            .filter(|d| !taken.contains(&d.position))
            .or_else(|| layout.resolve_by_markers(rule.markers, &taken).resolved());
        match dim {
            Some(dim) => {
                taken.push(dim.position);
                slots.push(QualifierSlot::Resolved(rule, dim));
            }
            None => {
                tracing::debug!(indicator, markers = ?rule.markers, "qualifier dimension not found");
                slots.push(QualifierSlot::Unresolved(rule));
            }
        }
    }

    for (key, observation) in &cube.observations {
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() != layout.dimension_count() {
            report.dropped.malformed_key += 1;
            continue;
        }

        let (country_code, period) = match (code_in(&parts, area), code_in(&parts, time)) {
            (Ok(c), Ok(t)) => (c, t),
            (Err(KeyError::Malformed), _) | (_, Err(KeyError::Malformed)) => {
                report.dropped.malformed_key += 1;
                continue;
            }
            _ => {
                report.dropped.out_of_range += 1;
                continue;
            }
        };

        let mut name = indicator.to_string();
        let mut rejected = None;
        for slot in &slots {
            match slot {
                QualifierSlot::Resolved(rule, dim) => match code_in(&parts, dim) {
                    Ok(code) => {
                        name.push('_');
                        name.push_str(&rule.label_for(code));
                    }
                    Err(e) => {
                        rejected = Some(e);
                        break;
                    }
                },
                QualifierSlot::Unresolved(rule) => {
                    name.push('_');
                    name.push_str(rule.unresolved_label());
                }
            }
        }
        match rejected {
            Some(KeyError::Malformed) => {
                report.dropped.malformed_key += 1;
                continue;
            }
            Some(KeyError::OutOfRange) => {
                report.dropped.out_of_range += 1;
                continue;
            }
            None => {}
        }

        let Some(year) = parse_year(period) else {
            report.dropped.bad_period += 1;
            continue;
        };

        if !countries.contains_code(country_code) {
            report.dropped.unknown_country += 1;
            continue;
        }

        let Some(value) = first_value(observation) else {
            report.dropped.missing_value += 1;
            continue;
        };

        report
            .records
            .push(FlatRecord::new(country_code, year, name, value, Source::Sdmx));
    }

    report.records.sort_by(|a, b| {
        (&a.indicator, &a.country, a.year).cmp(&(&b.indicator, &b.country, b.year))
    });
    report
}

/// Code addressed by `parts` in `dim`, bounds-checked.
fn code_in<'a>(parts: &[&str], dim: &'a DimensionIndex) -> Result<&'a str, KeyError> {
    let index: usize = parts
        .get(dim.position)
        .and_then(|p| p.trim().parse().ok())
        .ok_or(KeyError::Malformed)?;
    dim.code_at(index).ok_or(KeyError::OutOfRange)
}

/// Annual periods are plain years; sub-annual ones (`2020-Q1`, `2020-03`)
/// keep their year.
fn parse_year(period: &str) -> Option<i32> {
    let period = period.trim();
    let head = period.split('-').next()?;
    if head.len() != 4 || !head.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

/// First slot of an observation array; further slots are attribute indices.
fn first_value(observation: &Value) -> Option<f64> {
    let slot = match observation {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let value = match slot {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}
