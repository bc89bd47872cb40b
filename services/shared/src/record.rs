//! Canonical record shapes shared by every stage of the pipeline.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upstream statistical APIs feeding the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// OECD SDMX-JSON cubes (primary statistical source)
    Sdmx,
    /// World Bank development indicators
    WorldBank,
    /// WHO Global Health Observatory
    Who,
}

impl Source {
    pub const ALL: [Self; 3] = [Self::Sdmx, Self::WorldBank, Self::Who];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sdmx => "sdmx",
            Self::WorldBank => "worldbank",
            Self::Who => "who",
        }
    }

    /// Staging table holding this source's normalized long-format rows.
    pub const fn staging_table(self) -> &'static str {
        match self {
            Self::Sdmx => "oecd_sdmx_health",
            Self::WorldBank => "worldbank_indicators",
            Self::Who => "who_diabetes_obesity",
        }
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sdmx" | "oecd" => Ok(Self::Sdmx),
            "worldbank" | "wb" => Ok(Self::WorldBank),
            "who" | "gho" => Ok(Self::Who),
            other => Err(ConfigError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

/// Natural key of the fact table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub country: String,
    pub year: i32,
    pub indicator: String,
}

/// One observation in canonical long format. `value` is never null:
/// null observations are dropped before a record is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub country: String,
    pub year: i32,
    pub indicator: String,
    pub value: f64,
    pub source: Source,
}

impl FlatRecord {
    pub fn new(
        country: impl Into<String>,
        year: i32,
        indicator: impl Into<String>,
        value: f64,
        source: Source,
    ) -> Self {
        Self {
            country: country.into(),
            year,
            indicator: indicator.into(),
            value,
            source,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            country: self.country.clone(),
            year: self.year,
            indicator: self.indicator.clone(),
        }
    }
}

/// A row of the merged fact table after priority resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRecord {
    pub country: String,
    pub year: i32,
    pub indicator: String,
    pub value: f64,
    pub source: Source,
    pub load_ts: DateTime<Utc>,
}

impl MergedRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            country: self.country.clone(),
            year: self.year,
            indicator: self.indicator.clone(),
        }
    }
}

/// Total trust order over sources, highest priority first.
///
/// Sources not listed explicitly are appended in default order so the
/// order stays total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<Source>,
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self {
            order: vec![Source::Sdmx, Source::WorldBank, Source::Who],
        }
    }
}

impl SourcePriority {
    pub fn new(listed: Vec<Source>) -> Result<Self, ConfigError> {
        let mut order: Vec<Source> = Vec::with_capacity(Source::ALL.len());
        for source in listed {
            if order.contains(&source) {
                return Err(ConfigError::DuplicateSource {
                    value: source.to_string(),
                });
            }
            order.push(source);
        }
        for source in Self::default().order {
            if !order.contains(&source) {
                order.push(source);
            }
        }
        Ok(Self { order })
    }

    /// 0 is the most trusted source.
    pub fn rank(&self, source: Source) -> usize {
        self.order
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.order.len())
    }

    pub fn sources(&self) -> &[Source] {
        &self.order
    }
}

impl FromStr for SourcePriority {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let listed = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Source::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(listed)
    }
}

impl Display for SourcePriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.order.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(" > "))
    }
}
