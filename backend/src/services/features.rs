//! Feature engineering for active and completed crop cycles
//!
//! Both builders go through [`engineer_features`], so a model sees features
//! derived the same way at training and at prediction time. The only thing
//! that differs between them is where the sensor window ends.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::models::feature_names::*;
use crate::models::{CycleContext, FeatureRow, SensorReading};
use crate::storage::PipelineStore;
use shared::{start_of_day, TimeWindow};

/// Base temperature for growing degree days, in °C
pub const BASE_TEMPERATURE: f64 = 10.0;

/// Derive a feature row from a cycle and the readings inside its window
///
/// With no readings every sensor-derived column is present but missing.
/// `cycle_duration_days` counts whole days from planting-day midnight to
/// `window_end`, clamped at zero. It is emitted even for a cycle without
/// readings, where older batch predictors left it unset, since it does not
/// depend on sensors.
pub fn engineer_features(
    cycle: &CycleContext,
    readings: &[SensorReading],
    window_end: DateTime<Utc>,
) -> FeatureRow {
    let elapsed_days = (window_end - start_of_day(cycle.planting_date))
        .num_days()
        .max(0);

    let temperatures: Vec<f64> = readings.iter().filter_map(|r| r.temperature).collect();
    let humidity: Vec<f64> = readings.iter().filter_map(|r| r.humidity).collect();
    let soil_moisture: Vec<f64> = readings.iter().filter_map(|r| r.soil_moisture).collect();

    let min_temp = temperatures.iter().copied().reduce(f64::min);
    let max_temp = temperatures.iter().copied().reduce(f64::max);
    let gdd = match (min_temp, max_temp) {
        (Some(min), Some(max)) => {
            Some(((max + min) / 2.0 - BASE_TEMPERATURE).max(0.0) * elapsed_days as f64)
        }
        _ => None,
    };

    FeatureRow::new(cycle.crop_cycle_id)
        .with(AVG_TEMP, mean(&temperatures))
        .with(MIN_TEMP, min_temp)
        .with(MAX_TEMP, max_temp)
        .with(AVG_HUMIDITY, mean(&humidity))
        .with(AVG_SOIL_MOISTURE, mean(&soil_moisture))
        .with(GDD_APPROX, gdd)
        .with(CYCLE_DURATION_DAYS, Some(elapsed_days as f64))
        .with(FIELD_AREA_HECTARES, cycle.field_area_hectares.to_f64())
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// One labelled row of the training set
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub features: FeatureRow,
    /// Yield in tonnes per hectare
    pub target: f64,
}

impl TrainingRow {
    pub fn crop_cycle_id(&self) -> i64 {
        self.features.crop_cycle_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    NonPositiveDuration,
    MissingFieldArea,
    NoSensorData,
    InvalidYield,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NonPositiveDuration => "harvest is not after planting",
            Self::MissingFieldArea => "field area is zero or unknown",
            Self::NoSensorData => "no sensor readings in the cycle window",
            Self::InvalidYield => "recorded yield does not fit a float",
        };
        f.write_str(reason)
    }
}

/// Completed cycles turned into labelled rows, plus what was left out
#[derive(Debug, Default)]
pub struct TrainingSet {
    pub rows: Vec<TrainingRow>,
    pub excluded: Vec<(i64, ExclusionReason)>,
}

/// Feature builders over any pipeline store
pub struct FeatureService<'a> {
    store: &'a dyn PipelineStore,
}

impl<'a> FeatureService<'a> {
    pub fn new(store: &'a dyn PipelineStore) -> Self {
        Self { store }
    }

    /// One feature row per active cycle, sensor history up to `now`
    ///
    /// Cycles without readings are kept; their sensor columns are missing.
    pub async fn active_features(&self, now: DateTime<Utc>) -> AppResult<Vec<FeatureRow>> {
        let cycles = self.store.active_cycles().await?;
        let mut rows = Vec::with_capacity(cycles.len());

        for cycle in &cycles {
            let window = TimeWindow::since_planting(cycle.planting_date, now);
            let readings = self
                .store
                .readings_for_field(cycle.field_id, window)
                .await?;

            if readings.is_empty() {
                debug!(
                    crop_cycle_id = cycle.crop_cycle_id,
                    field_id = cycle.field_id,
                    "No sensor readings since planting"
                );
            }

            rows.push(engineer_features(cycle, &readings, now));
        }

        info!(cycles = rows.len(), "Built features for active cycles");
        Ok(rows)
    }

    /// Labelled rows for every completed cycle that can be trained on
    pub async fn training_set(&self) -> AppResult<TrainingSet> {
        let cycles = self.store.completed_cycles().await?;
        let mut set = TrainingSet::default();

        for cycle in &cycles {
            let (Some(harvest_date), Some(yield_tonnes)) =
                (cycle.actual_harvest_date, cycle.actual_yield_tonnes)
            else {
                continue;
            };

            let window = TimeWindow::planting_to_harvest(cycle.planting_date, harvest_date);
            let outcome = self
                .training_row(cycle, window, yield_tonnes)
                .await?;

            match outcome {
                Ok(row) => set.rows.push(row),
                Err(reason) => {
                    warn!(
                        crop_cycle_id = cycle.crop_cycle_id,
                        reason = %reason,
                        "Excluding crop cycle from training set"
                    );
                    set.excluded.push((cycle.crop_cycle_id, reason));
                }
            }
        }

        info!(
            rows = set.rows.len(),
            excluded = set.excluded.len(),
            "Built training set"
        );
        Ok(set)
    }

    async fn training_row(
        &self,
        cycle: &CycleContext,
        window: TimeWindow,
        yield_tonnes: Decimal,
    ) -> AppResult<Result<TrainingRow, ExclusionReason>> {
        let duration_days = (window.end - window.start).num_days();
        if duration_days <= 0 {
            return Ok(Err(ExclusionReason::NonPositiveDuration));
        }

        if cycle.field_area_hectares <= Decimal::ZERO {
            return Ok(Err(ExclusionReason::MissingFieldArea));
        }

        let readings = self
            .store
            .readings_for_field(cycle.field_id, window)
            .await?;
        if readings.is_empty() {
            return Ok(Err(ExclusionReason::NoSensorData));
        }

        let Some(target) = (yield_tonnes / cycle.field_area_hectares).to_f64() else {
            return Ok(Err(ExclusionReason::InvalidYield));
        };

        Ok(Ok(TrainingRow {
            features: engineer_features(cycle, &readings, window.end),
            target,
        }))
    }
}
