use async_trait::async_trait;
use shared::{CycleContext, PredictionUpsert, SensorReading, TimeWindow, UpsertOutcome, YieldPrediction};
use sqlx::PgPool;

use super::PipelineStore;
use crate::error::AppResult;
use crate::services::{CropCycleService, PredictionService, SensorReadingService};

/// Postgres-backed pipeline storage
#[derive(Clone)]
pub struct PgStore {
    crop_cycles: CropCycleService,
    sensors: SensorReadingService,
    predictions: PredictionService,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self {
            crop_cycles: CropCycleService::new(db.clone()),
            sensors: SensorReadingService::new(db.clone()),
            predictions: PredictionService::new(db),
        }
    }

    pub fn crop_cycles(&self) -> &CropCycleService {
        &self.crop_cycles
    }

    pub fn sensors(&self) -> &SensorReadingService {
        &self.sensors
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn active_cycles(&self) -> AppResult<Vec<CycleContext>> {
        self.crop_cycles.active_cycles().await
    }

    async fn completed_cycles(&self) -> AppResult<Vec<CycleContext>> {
        self.crop_cycles.completed_cycles().await
    }

    async fn readings_for_field(
        &self,
        field_id: i64,
        window: TimeWindow,
    ) -> AppResult<Vec<SensorReading>> {
        self.sensors.readings_for_field(field_id, window).await
    }

    async fn upsert_prediction(&self, prediction: &PredictionUpsert) -> AppResult<UpsertOutcome> {
        self.predictions.upsert(prediction).await
    }

    async fn predictions_for_cycle(&self, crop_cycle_id: i64) -> AppResult<Vec<YieldPrediction>> {
        self.predictions.predictions_for_cycle(crop_cycle_id).await
    }
}
