//! SDMX-JSON data message model and dimension index.
//!
//! Observations are requested with `dimensionAtObservation=AllDimensions`, so
//! each observation key is a colon-joined tuple of value positions, one per
//! observation dimension, in the order the structure section declares them.
//! That order differs between dataflows and even between fallback queries on
//! the same dataflow, so it is re-read from every response.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CubeError {
    #[error("message has no data section")]
    MissingData,
    #[error("message has no data set")]
    MissingDataSet,
    #[error("message has no structure section")]
    MissingStructure,
    #[error("data set has no observations section")]
    MissingObservations,
    #[error("malformed message: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct Message {
    data: Option<MessageData>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(rename = "dataSets", default)]
    data_sets: Vec<DataSet>,
    #[serde(default)]
    structures: Vec<Structure>,
    /// Pre-2.0 messages carry a single `structure` object.
    #[serde(default)]
    structure: Option<Structure>,
}

#[derive(Debug, Deserialize)]
struct DataSet {
    #[serde(default)]
    observations: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct Structure {
    dimensions: Dimensions,
}

#[derive(Debug, Deserialize)]
struct Dimensions {
    #[serde(default)]
    observation: Vec<DimensionDef>,
}

#[derive(Debug, Deserialize)]
struct DimensionDef {
    id: String,
    #[serde(default)]
    values: Vec<DimensionValue>,
}

#[derive(Debug, Deserialize)]
struct DimensionValue {
    id: String,
}

/// One observation dimension: its offset inside observation keys and its
/// value codes. A code's index in `codes` is its position as published;
/// never re-sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionIndex {
    pub id: String,
    pub position: usize,
    codes: Vec<String>,
}

impl DimensionIndex {
    pub fn new(id: impl Into<String>, position: usize, codes: Vec<String>) -> Self {
        Self {
            id: id.into(),
            position,
            codes,
        }
    }

    pub fn code_at(&self, index: usize) -> Option<&str> {
        self.codes.get(index).map(String::as_str)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

/// Result of looking a dimension up in one response.
#[derive(Debug, Clone, Copy)]
pub enum DimensionSlot<'a> {
    Resolved(&'a DimensionIndex),
    Unresolved,
}

impl<'a> DimensionSlot<'a> {
    pub fn resolved(self) -> Option<&'a DimensionIndex> {
        match self {
            Self::Resolved(dim) => Some(dim),
            Self::Unresolved => None,
        }
    }
}

/// Observation dimensions of one response, keyed by structural id.
#[derive(Debug, Clone, Default)]
pub struct DimensionTable {
    dims: Vec<DimensionIndex>,
    by_id: HashMap<String, usize>,
}

impl DimensionTable {
    /// Build from `(id, codes)` in declared order.
    pub fn from_declared<I, C>(declared: I) -> Self
    where
        I: IntoIterator<Item = (String, C)>,
        C: IntoIterator<Item = String>,
    {
        let mut table = Self::default();
        for (position, (id, codes)) in declared.into_iter().enumerate() {
            // First declaration wins on a duplicated id.
            table.by_id.entry(id.clone()).or_insert(position);
            table
                .dims
                .push(DimensionIndex::new(id, position, codes.into_iter().collect()));
        }
        table
    }

    /// Number of declared observation dimensions.
    pub fn dimension_count(&self) -> usize {
        self.dims.len()
    }

    /// Resolve the first of `ids` present in this response.
    pub fn resolve(&self, ids: &[&str]) -> DimensionSlot<'_> {
        ids.iter()
            .find_map(|id| self.by_id.get(*id))
            .map(|&pos| DimensionSlot::Resolved(&self.dims[pos]))
            .unwrap_or(DimensionSlot::Unresolved)
    }

    /// Content heuristic: among dimensions not in `exclude`, prefer one whose
    /// codes include every marker, else the first including any marker.
    pub fn resolve_by_markers(&self, markers: &[&str], exclude: &[usize]) -> DimensionSlot<'_> {
        if markers.is_empty() {
            return DimensionSlot::Unresolved;
        }
        let candidates: Vec<&DimensionIndex> = self
            .dims
            .iter()
            .filter(|d| !exclude.contains(&d.position))
            .filter(|d| markers.iter().any(|m| d.contains(m)))
            .collect();

        candidates
            .iter()
            .find(|d| markers.iter().all(|m| d.contains(m)))
            .or_else(|| candidates.first())
            .map(|d| DimensionSlot::Resolved(*d))
            .unwrap_or(DimensionSlot::Unresolved)
    }
}

/// Decoded-ready cube: dimension layout plus the sparse observation map.
#[derive(Debug, Clone)]
pub struct Cube {
    pub layout: DimensionTable,
    pub observations: BTreeMap<String, Value>,
}

impl Cube {
    /// Pull the first data set and its structure out of a data message.
    pub fn from_json(doc: Value) -> Result<Self, CubeError> {
        let message: Message =
            serde_json::from_value(doc).map_err(|e| CubeError::Malformed(e.to_string()))?;
        let data = message.data.ok_or(CubeError::MissingData)?;

        let data_set = data
            .data_sets
            .into_iter()
            .next()
            .ok_or(CubeError::MissingDataSet)?;
        let structure = data
            .structures
            .into_iter()
            .next()
            .or(data.structure)
            .ok_or(CubeError::MissingStructure)?;
        let observations = data_set
            .observations
            .ok_or(CubeError::MissingObservations)?;

        let layout = DimensionTable::from_declared(
            structure
                .dimensions
                .observation
                .into_iter()
                .map(|d| (d.id, d.values.into_iter().map(|v| v.id))),
        );

        Ok(Self {
            layout,
            observations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// `("REF_AREA", "ESP,FRA")` style declarations.
    fn table(dims: &[(&str, &str)]) -> DimensionTable {
        DimensionTable::from_declared(dims.iter().map(|(id, codes)| {
            (
                id.to_string(),
                codes
                    .split(',')
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            )
        }))
    }

    #[test]
    fn test_positions_follow_declared_order() {
        let layout = table(&[
            ("REF_AREA", "ESP,FRA"),
            ("MEASURE", "OBS"),
            ("TIME_PERIOD", "2020,2021"),
        ]);
        let time = layout.resolve(&["TIME_PERIOD"]).resolved().unwrap();
        assert_eq!(time.position, 2);
        assert_eq!(time.code_at(1), Some("2021"));
        assert_eq!(time.code_at(2), None);
    }

    #[test]
    fn test_resolve_tries_aliases_in_order() {
        let layout = table(&[("LOCATION", "ESP"), ("TIME_PERIOD", "2020")]);
        let area = layout.resolve(&["REF_AREA", "LOCATION"]).resolved().unwrap();
        assert_eq!(area.id, "LOCATION");
        assert!(layout.resolve(&["UNIT_MEASURE"]).resolved().is_none());
    }

    #[test]
    fn test_marker_heuristic_prefers_dimension_with_all_markers() {
        let layout = table(&[
            ("REF_AREA", "ESP"),
            ("HOUSEHOLD", "AW67,AW100"),
            ("WAGE", "AW67,_Z"),
            ("TIME_PERIOD", "2020"),
        ]);
        let dim = layout.resolve_by_markers(&["AW67", "_Z"], &[0, 3]).resolved().unwrap();
        assert_eq!(dim.id, "WAGE");
    }

    #[test]
    fn test_marker_heuristic_falls_back_to_first_partial_match() {
        let layout = table(&[
            ("REF_AREA", "ESP"),
            ("METHOD", "MSRD,X"),
            ("OTHER", "SR"),
        ]);
        let dim = layout.resolve_by_markers(&["MSRD", "SR"], &[0]).resolved().unwrap();
        assert_eq!(dim.id, "METHOD");
    }

    #[test]
    fn test_marker_heuristic_respects_exclusions() {
        let layout = table(&[("REF_AREA", "SR"), ("TIME_PERIOD", "2020")]);
        assert!(layout.resolve_by_markers(&["SR"], &[0]).resolved().is_none());
    }

    #[test]
    fn test_cube_from_structures_array() {
        let doc = json!({
            "data": {
                "dataSets": [{ "observations": { "0:0": [1.5] } }],
                "structures": [{
                    "dimensions": { "observation": [
                        { "id": "REF_AREA", "values": [{ "id": "ESP", "name": "Spain" }] },
                        { "id": "TIME_PERIOD", "values": [{ "id": "2020" }] }
                    ]}
                }]
            }
        });
        let cube = Cube::from_json(doc).unwrap();
        let time = cube.layout.resolve(&["TIME_PERIOD"]).resolved().unwrap();
        assert_eq!(time.position, 1);
        assert_eq!(cube.observations.len(), 1);
    }

    #[test]
    fn test_cube_from_legacy_structure_object() {
        let doc = json!({
            "data": {
                "dataSets": [{ "observations": {} }],
                "structure": { "dimensions": { "observation": [
                    { "id": "REF_AREA", "values": [] }
                ]}}
            }
        });
        let cube = Cube::from_json(doc).unwrap();
        assert!(cube.observations.is_empty());
        let area = cube.layout.resolve(&["REF_AREA"]).resolved().unwrap();
        assert_eq!(area.position, 0);
    }

    #[test]
    fn test_cube_missing_sections() {
        assert_eq!(Cube::from_json(json!({})).unwrap_err(), CubeError::MissingData);
        assert_eq!(
            Cube::from_json(json!({ "data": { "dataSets": [] } })).unwrap_err(),
            CubeError::MissingDataSet
        );
        assert_eq!(
            Cube::from_json(json!({ "data": { "dataSets": [{}], "structures": [] } }))
                .unwrap_err(),
            CubeError::MissingStructure
        );
        let no_obs = json!({
            "data": {
                "dataSets": [{}],
                "structures": [{ "dimensions": { "observation": [] } }]
            }
        });
        assert_eq!(
            Cube::from_json(no_obs).unwrap_err(),
            CubeError::MissingObservations
        );
    }

    #[test]
    fn test_cube_rejects_non_object() {
        assert!(matches!(
            Cube::from_json(json!("NoResultsFound")),
            Err(CubeError::Malformed(_))
        ));
    }
}
