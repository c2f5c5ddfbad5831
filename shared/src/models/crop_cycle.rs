//! Crop cycle models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One planting-to-harvest period on a field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropCycle {
    pub id: i64,
    pub field_id: i64,
    pub crop_type: String,
    pub planting_date: NaiveDate,
    pub expected_harvest_date: Option<NaiveDate>,
    pub actual_harvest_date: Option<NaiveDate>,
    /// Harvested tonnage for the whole field; the training target
    pub actual_yield_tonnes: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CropCycle {
    /// A cycle is active until its harvest date is recorded
    pub fn is_active(&self) -> bool {
        self.actual_harvest_date.is_none()
    }
}

/// A crop cycle joined to the field attributes the feature builders need
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleContext {
    pub crop_cycle_id: i64,
    pub field_id: i64,
    pub crop_type: String,
    pub planting_date: NaiveDate,
    pub actual_harvest_date: Option<NaiveDate>,
    pub actual_yield_tonnes: Option<Decimal>,
    pub field_area_hectares: Decimal,
    pub soil_type: Option<String>,
}

impl CycleContext {
    pub fn is_active(&self) -> bool {
        self.actual_harvest_date.is_none()
    }

    /// Whether the cycle carries a complete harvest outcome
    pub fn is_completed(&self) -> bool {
        self.actual_harvest_date.is_some() && self.actual_yield_tonnes.is_some()
    }
}
