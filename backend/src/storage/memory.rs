use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    field_id_from_device_id, validate_field_area, validate_sensor_reading, CropCycle, CycleContext,
    Field, NewSensorReading, PredictionUpsert, SensorReading, TimeWindow, UpsertOutcome,
    YieldPrediction,
};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::PipelineStore;
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Tables {
    fields: HashMap<i64, Field>,
    crop_cycles: Vec<CropCycle>,
    readings: Vec<SensorReading>,
    devices: HashMap<String, i64>,
    predictions: HashMap<(i64, String), YieldPrediction>,
    next_reading_id: i64,
    next_prediction_id: i64,
}

/// In-process pipeline storage with the same semantics as Postgres
///
/// Used by tests and local dry runs. All tables sit behind one lock, so an
/// upsert is atomic with respect to concurrent callers.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_field(
        &self,
        field_id: i64,
        farm_id: i64,
        area_hectares: Decimal,
        soil_type: Option<&str>,
    ) -> AppResult<()> {
        validate_field_area(area_hectares).map_err(|e| AppError::ValidationError(e.to_string()))?;
        let now = Utc::now();
        self.tables.lock().await.fields.insert(
            field_id,
            Field {
                id: field_id,
                farm_id,
                name: format!("Field {}", field_id),
                area_hectares,
                soil_type: soil_type.map(str::to_string),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    pub async fn insert_crop_cycle(
        &self,
        crop_cycle_id: i64,
        field_id: i64,
        crop_type: &str,
        planting_date: NaiveDate,
    ) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.fields.contains_key(&field_id) {
            return Err(AppError::NotFound("Field".to_string()));
        }
        let now = Utc::now();
        tables.crop_cycles.push(CropCycle {
            id: crop_cycle_id,
            field_id,
            crop_type: crop_type.to_string(),
            planting_date,
            expected_harvest_date: None,
            actual_harvest_date: None,
            actual_yield_tonnes: None,
            notes: None,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    /// Record the harvest outcome, which ends the cycle
    pub async fn record_harvest(
        &self,
        crop_cycle_id: i64,
        harvest_date: NaiveDate,
        yield_tonnes: Option<Decimal>,
    ) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        let cycle = tables
            .crop_cycles
            .iter_mut()
            .find(|c| c.id == crop_cycle_id)
            .ok_or_else(|| AppError::NotFound("Crop cycle".to_string()))?;
        cycle.actual_harvest_date = Some(harvest_date);
        cycle.actual_yield_tonnes = yield_tonnes;
        cycle.updated_at = Utc::now();
        Ok(())
    }

    /// Store a reading, attributing its device by the naming convention
    pub async fn record_reading(&self, input: NewSensorReading) -> AppResult<SensorReading> {
        validate_sensor_reading(&input).map_err(AppError::ValidationError)?;
        let mut tables = self.tables.lock().await;

        if let Some(field_id) = field_id_from_device_id(&input.device_id) {
            if tables.fields.contains_key(&field_id) {
                tables.devices.entry(input.device_id.clone()).or_insert(field_id);
            }
        }

        tables.next_reading_id += 1;
        let received_at = Utc::now();
        let reading = SensorReading {
            id: tables.next_reading_id,
            device_id: input.device_id,
            temperature: input.temperature,
            humidity: input.humidity,
            soil_moisture: input.soil_moisture,
            custom_data: input.custom_data,
            timestamp: input.timestamp.unwrap_or(received_at),
            received_at,
        };
        tables.readings.push(reading.clone());
        Ok(reading)
    }

    pub async fn register_device(&self, device_id: &str, field_id: i64) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.fields.contains_key(&field_id) {
            return Err(AppError::NotFound("Field".to_string()));
        }
        tables.devices.insert(device_id.to_string(), field_id);
        Ok(())
    }

    pub async fn prediction_count(&self) -> usize {
        self.tables.lock().await.predictions.len()
    }

    fn context(tables: &Tables, cycle: &CropCycle) -> Option<CycleContext> {
        tables.fields.get(&cycle.field_id).map(|field| CycleContext {
            crop_cycle_id: cycle.id,
            field_id: cycle.field_id,
            crop_type: cycle.crop_type.clone(),
            planting_date: cycle.planting_date,
            actual_harvest_date: cycle.actual_harvest_date,
            actual_yield_tonnes: cycle.actual_yield_tonnes,
            field_area_hectares: field.area_hectares,
            soil_type: field.soil_type.clone(),
        })
    }

    async fn cycles_where(&self, keep: impl Fn(&CycleContext) -> bool) -> Vec<CycleContext> {
        let tables = self.tables.lock().await;
        let mut cycles: Vec<CycleContext> = tables
            .crop_cycles
            .iter()
            .filter_map(|c| Self::context(&tables, c))
            .filter(|c| keep(c))
            .collect();
        cycles.sort_by_key(|c| c.crop_cycle_id);
        cycles
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn active_cycles(&self) -> AppResult<Vec<CycleContext>> {
        Ok(self.cycles_where(CycleContext::is_active).await)
    }

    async fn completed_cycles(&self) -> AppResult<Vec<CycleContext>> {
        Ok(self.cycles_where(CycleContext::is_completed).await)
    }

    async fn readings_for_field(
        &self,
        field_id: i64,
        window: TimeWindow,
    ) -> AppResult<Vec<SensorReading>> {
        let tables = self.tables.lock().await;
        let mut readings: Vec<SensorReading> = tables
            .readings
            .iter()
            .filter(|r| tables.devices.get(&r.device_id) == Some(&field_id))
            .filter(|r| window.contains(r.timestamp))
            .cloned()
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        Ok(readings)
    }

    async fn upsert_prediction(&self, prediction: &PredictionUpsert) -> AppResult<UpsertOutcome> {
        let mut tables = self.tables.lock().await;
        if !tables.crop_cycles.iter().any(|c| c.id == prediction.crop_cycle_id) {
            return Err(AppError::NotFound("Crop cycle".to_string()));
        }

        let key = (prediction.crop_cycle_id, prediction.model_version.clone());
        if let Some(existing) = tables.predictions.get_mut(&key) {
            existing.predicted_yield_tonnes_per_hectare =
                prediction.predicted_yield_tonnes_per_hectare;
            existing.predicted_at = prediction.predicted_at;
            existing.confidence_score = prediction.confidence_score;
            existing.input_features = prediction.input_features.clone();
            return Ok(UpsertOutcome::Updated);
        }

        tables.next_prediction_id += 1;
        let row = YieldPrediction {
            id: tables.next_prediction_id,
            crop_cycle_id: prediction.crop_cycle_id,
            model_version: prediction.model_version.clone(),
            predicted_yield_tonnes_per_hectare: prediction.predicted_yield_tonnes_per_hectare,
            predicted_at: prediction.predicted_at,
            confidence_score: prediction.confidence_score,
            input_features: prediction.input_features.clone(),
        };
        tables.predictions.insert(key, row);
        Ok(UpsertOutcome::Inserted)
    }

    async fn predictions_for_cycle(&self, crop_cycle_id: i64) -> AppResult<Vec<YieldPrediction>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<YieldPrediction> = tables
            .predictions
            .values()
            .filter(|p| p.crop_cycle_id == crop_cycle_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.predicted_at.cmp(&a.predicted_at));
        Ok(rows)
    }
}
