//! Country dictionary: canonical country name <-> ISO3 code.
//!
//! Records are keyed by ISO3 code. The dictionary filters out aggregates and
//! regions the upstream APIs publish alongside countries, and relabels
//! sources that report a country name instead of a code.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::ConfigError;

/// Built-in dictionary (OECD members plus partner economies).
const DEFAULT_COUNTRIES: &[(&str, &str)] = &[
    ("Australia", "AUS"),
    ("Austria", "AUT"),
    ("Belgium", "BEL"),
    ("Brazil", "BRA"),
    ("Bulgaria", "BGR"),
    ("Canada", "CAN"),
    ("Chile", "CHL"),
    ("China", "CHN"),
    ("Colombia", "COL"),
    ("Costa Rica", "CRI"),
    ("Croatia", "HRV"),
    ("Cyprus", "CYP"),
    ("Czechia", "CZE"),
    ("Denmark", "DNK"),
    ("Estonia", "EST"),
    ("Finland", "FIN"),
    ("France", "FRA"),
    ("Germany", "DEU"),
    ("Greece", "GRC"),
    ("Hungary", "HUN"),
    ("Iceland", "ISL"),
    ("India", "IND"),
    ("Indonesia", "IDN"),
    ("Ireland", "IRL"),
    ("Israel", "ISR"),
    ("Italy", "ITA"),
    ("Japan", "JPN"),
    ("Korea", "KOR"),
    ("Latvia", "LVA"),
    ("Lithuania", "LTU"),
    ("Luxembourg", "LUX"),
    ("Malta", "MLT"),
    ("Mexico", "MEX"),
    ("Netherlands", "NLD"),
    ("New Zealand", "NZL"),
    ("Norway", "NOR"),
    ("Peru", "PER"),
    ("Poland", "POL"),
    ("Portugal", "PRT"),
    ("Romania", "ROU"),
    ("Slovak Republic", "SVK"),
    ("Slovenia", "SVN"),
    ("South Africa", "ZAF"),
    ("Spain", "ESP"),
    ("Sweden", "SWE"),
    ("Switzerland", "CHE"),
    ("Turkey", "TUR"),
    ("United Kingdom", "GBR"),
    ("United States", "USA"),
];

#[derive(Debug, Clone)]
pub struct CountryDictionary {
    code_to_name: BTreeMap<String, String>,
    name_to_code: HashMap<String, String>,
}

impl Default for CountryDictionary {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_COUNTRIES.iter().map(|(n, c)| (*n, *c)))
    }
}

impl CountryDictionary {
    /// Build from `(name, code)` pairs. Entries whose code is not three
    /// ASCII letters are skipped.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut code_to_name = BTreeMap::new();
        let mut name_to_code = HashMap::new();
        for (name, code) in pairs {
            let code = code.trim().to_ascii_uppercase();
            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                tracing::warn!(country = name, code = %code, "skipping country without ISO3 code");
                continue;
            }
            let name = name.trim().to_string();
            name_to_code.insert(name.to_lowercase(), code.clone());
            code_to_name.insert(code, name);
        }
        Self {
            code_to_name,
            name_to_code,
        }
    }

    /// Load a JSON object of `{ "Country name": "ISO", ... }`.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let dict_err = |reason: String| ConfigError::CountryDictionary {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| dict_err(e.to_string()))?;
        let entries: BTreeMap<String, String> =
            serde_json::from_str(&content).map_err(|e| dict_err(e.to_string()))?;
        Ok(Self::from_pairs(
            entries.iter().map(|(n, c)| (n.as_str(), c.as_str())),
        ))
    }

    pub fn len(&self) -> usize {
        self.code_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_to_name.is_empty()
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.code_to_name.contains_key(code)
    }

    pub fn name_of(&self, code: &str) -> Option<&str> {
        self.code_to_name.get(code).map(String::as_str)
    }

    pub fn code_of(&self, name: &str) -> Option<&str> {
        self.name_to_code
            .get(&name.trim().to_lowercase())
            .map(String::as_str)
    }

    /// Resolve a raw country label (ISO3 code or country name, any case)
    /// to its ISO3 code. `None` means the label is not a known country.
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let upper = trimmed.to_ascii_uppercase();
        if self.contains_code(&upper) {
            return Some(upper);
        }
        self.code_of(trimmed).map(str::to_string)
    }

    /// Codes in sorted order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.code_to_name.keys().map(String::as_str)
    }

    /// `(code, name)` pairs in code order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.code_to_name
            .iter()
            .map(|(c, n)| (c.as_str(), n.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_dictionary_maps_both_ways() {
        let dict = CountryDictionary::default();
        assert_eq!(dict.name_of("ESP"), Some("Spain"));
        assert_eq!(dict.code_of("spain"), Some("ESP"));
        assert!(!dict.contains_code("OED"));
    }

    #[test]
    fn test_canonicalize_accepts_code_or_name() {
        let dict = CountryDictionary::default();
        assert_eq!(dict.canonicalize("fra").as_deref(), Some("FRA"));
        assert_eq!(dict.canonicalize(" France ").as_deref(), Some("FRA"));
        assert_eq!(dict.canonicalize("EU27_2020"), None);
        assert_eq!(dict.canonicalize(""), None);
    }

    #[test]
    fn test_from_pairs_skips_non_iso3_codes() {
        let dict = CountryDictionary::from_pairs([("Spain", "ESP"), ("Kosovo", "XK")]);
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.code_of("Kosovo"), None);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Spain": "ESP", "Portugal": "prt"}}"#).unwrap();

        let dict = CountryDictionary::from_json_file(file.path()).unwrap();
        assert_eq!(dict.codes().collect::<Vec<_>>(), vec!["ESP", "PRT"]);
        assert_eq!(dict.name_of("PRT"), Some("Portugal"));
    }

    #[test]
    fn test_from_json_file_missing_is_config_error() {
        let err = CountryDictionary::from_json_file(Path::new("/nonexistent/countries.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::CountryDictionary { .. }));
    }
}
