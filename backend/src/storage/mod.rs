//! Storage boundary of the prediction pipeline
//!
//! The pipeline only reaches storage through [`PipelineStore`]. The Postgres
//! implementation delegates to the table services; the in-memory one backs
//! tests and local dry runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use shared::{CycleContext, PredictionUpsert, SensorReading, TimeWindow, UpsertOutcome, YieldPrediction};

use crate::error::AppResult;

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Cycles without a recorded harvest date, joined to their field
    async fn active_cycles(&self) -> AppResult<Vec<CycleContext>>;

    /// Cycles with both a harvest date and a harvested yield
    async fn completed_cycles(&self) -> AppResult<Vec<CycleContext>>;

    /// Readings attributed to a field with a timestamp inside the window,
    /// oldest first
    async fn readings_for_field(
        &self,
        field_id: i64,
        window: TimeWindow,
    ) -> AppResult<Vec<SensorReading>>;

    /// Insert or overwrite the prediction for (crop cycle, model version)
    async fn upsert_prediction(&self, prediction: &PredictionUpsert) -> AppResult<UpsertOutcome>;

    /// Stored predictions for a cycle, newest first
    async fn predictions_for_cycle(&self, crop_cycle_id: i64) -> AppResult<Vec<YieldPrediction>>;
}
