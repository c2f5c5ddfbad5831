//! Yield prediction models

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A stored prediction, unique per (crop cycle, model version)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YieldPrediction {
    pub id: i64,
    pub crop_cycle_id: i64,
    pub model_version: String,
    /// Predicted yield in tonnes per hectare
    pub predicted_yield_tonnes_per_hectare: f64,
    pub predicted_at: DateTime<Utc>,
    pub confidence_score: Option<f64>,
    /// Feature values as built, before imputation; null marks an imputed value
    pub input_features: serde_json::Value,
}

impl YieldPrediction {
    /// Scale the per-hectare prediction to the whole field
    pub fn absolute_yield_tonnes(&self, area_hectares: Decimal) -> Option<f64> {
        area_hectares
            .to_f64()
            .map(|area| self.predicted_yield_tonnes_per_hectare * area)
    }
}

/// Everything needed to write one prediction
#[derive(Debug, Clone, Serialize)]
pub struct PredictionUpsert {
    pub crop_cycle_id: i64,
    pub model_version: String,
    pub predicted_yield_tonnes_per_hectare: f64,
    pub confidence_score: Option<f64>,
    pub input_features: serde_json::Value,
    pub predicted_at: DateTime<Utc>,
}

/// Whether an upsert created the row or overwrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}
