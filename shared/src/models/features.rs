//! Feature vocabulary and feature rows
//!
//! The vocabulary is the ordered list of feature names a model was fitted on.
//! It is the contract between the training-set export and the batch
//! predictor: every vector handed to a model has exactly these names, in
//! this order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feature names produced by the feature builders
pub mod feature_names {
    pub const AVG_TEMP: &str = "avg_temp";
    pub const MIN_TEMP: &str = "min_temp";
    pub const MAX_TEMP: &str = "max_temp";
    pub const AVG_HUMIDITY: &str = "avg_humidity";
    pub const AVG_SOIL_MOISTURE: &str = "avg_soil_moisture";
    pub const GDD_APPROX: &str = "gdd_approx";
    pub const CYCLE_DURATION_DAYS: &str = "cycle_duration_days";
    pub const FIELD_AREA_HECTARES: &str = "field_area_hectares";

    /// Features derived from sensor history; missing when a cycle has none
    pub const SENSOR_DERIVED: [&str; 6] = [
        AVG_TEMP,
        MIN_TEMP,
        MAX_TEMP,
        AVG_HUMIDITY,
        AVG_SOIL_MOISTURE,
        GDD_APPROX,
    ];

    /// Column order used by the training-set export
    pub const CANONICAL: [&str; 8] = [
        AVG_TEMP,
        MIN_TEMP,
        MAX_TEMP,
        AVG_HUMIDITY,
        AVG_SOIL_MOISTURE,
        GDD_APPROX,
        CYCLE_DURATION_DAYS,
        FIELD_AREA_HECTARES,
    ];
}

/// Label column of the training set
pub const TARGET_COLUMN: &str = "actual_yield_tonnes_per_hectare";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VocabularyError {
    #[error("feature vocabulary is empty")]
    Empty,

    #[error("feature vocabulary contains a blank name at position {0}")]
    BlankName(usize),

    #[error("feature vocabulary repeats '{0}'")]
    Duplicate(String),
}

/// Ordered, duplicate-free list of feature names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureVocabulary {
    names: Vec<String>,
}

impl FeatureVocabulary {
    pub fn new(names: Vec<String>) -> Result<Self, VocabularyError> {
        if names.is_empty() {
            return Err(VocabularyError::Empty);
        }
        for (position, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(VocabularyError::BlankName(position));
            }
            if names[..position].contains(name) {
                return Err(VocabularyError::Duplicate(name.clone()));
            }
        }
        Ok(Self { names })
    }

    /// The vocabulary produced by the training-set export
    pub fn canonical() -> Self {
        Self {
            names: feature_names::CANONICAL.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl TryFrom<Vec<String>> for FeatureVocabulary {
    type Error = VocabularyError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<FeatureVocabulary> for Vec<String> {
    fn from(vocabulary: FeatureVocabulary) -> Self {
        vocabulary.names
    }
}

/// One row of a features table: the columns a builder managed to produce
///
/// A column that is present with `None` is known-missing; a column that is
/// absent was never produced. Alignment treats both as missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub crop_cycle_id: i64,
    columns: Vec<(String, Option<f64>)>,
}

impl FeatureRow {
    pub fn new(crop_cycle_id: i64) -> Self {
        Self {
            crop_cycle_id,
            columns: Vec::new(),
        }
    }

    /// Set a column, replacing an earlier value under the same name
    pub fn set(&mut self, name: &str, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite());
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn with(mut self, name: &str, value: Option<f64>) -> Self {
        self.set(name, value);
        self
    }

    /// `None` when the column is absent, `Some(None)` when present but missing
    pub fn get(&self, name: &str) -> Option<Option<f64>> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Project onto a vocabulary, in vocabulary order
    pub fn to_vector(&self, vocabulary: &FeatureVocabulary) -> FeatureVector {
        FeatureVector {
            crop_cycle_id: self.crop_cycle_id,
            values: vocabulary
                .names()
                .iter()
                .map(|name| (name.clone(), self.get(name).flatten()))
                .collect(),
        }
    }
}

/// A feature row reconciled with a vocabulary: exactly its names, in order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub crop_cycle_id: i64,
    pub values: Vec<(String, Option<f64>)>,
}

impl FeatureVector {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn has_missing(&self) -> bool {
        self.values.iter().any(|(_, v)| v.is_none())
    }

    /// JSON object of the values, `null` for missing ones
    pub fn to_snapshot(&self) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .map(|(name, value)| {
                let value = value
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null);
                (name.clone(), value)
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}
