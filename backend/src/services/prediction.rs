//! Yield prediction persistence

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::{PredictionUpsert, UpsertOutcome, YieldPrediction};

/// Prediction service over the `yield_predictions` table
#[derive(Clone)]
pub struct PredictionService {
    db: PgPool,
}

/// Database row for a stored prediction
#[derive(Debug, Clone, sqlx::FromRow)]
struct YieldPredictionRow {
    pub id: i64,
    pub crop_cycle_id: i64,
    pub model_version: String,
    pub predicted_yield_tonnes_per_hectare: f64,
    pub predicted_at: DateTime<Utc>,
    pub confidence_score: Option<f64>,
    pub input_features: serde_json::Value,
}

impl From<YieldPredictionRow> for YieldPrediction {
    fn from(row: YieldPredictionRow) -> Self {
        Self {
            id: row.id,
            crop_cycle_id: row.crop_cycle_id,
            model_version: row.model_version,
            predicted_yield_tonnes_per_hectare: row.predicted_yield_tonnes_per_hectare,
            predicted_at: row.predicted_at,
            confidence_score: row.confidence_score,
            input_features: row.input_features,
        }
    }
}

impl PredictionService {
    /// Create a new PredictionService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Insert or overwrite the prediction for (crop cycle, model version)
    ///
    /// A single statement against the unique key: concurrent runs serialize
    /// on the row lock and converge to one row. The statement commits on its
    /// own, so every cycle is an independent unit of work.
    pub async fn upsert(&self, prediction: &PredictionUpsert) -> AppResult<UpsertOutcome> {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO yield_predictions (crop_cycle_id, model_version,
                                           predicted_yield_tonnes_per_hectare, predicted_at,
                                           confidence_score, input_features)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (crop_cycle_id, model_version) DO UPDATE
                SET predicted_yield_tonnes_per_hectare = EXCLUDED.predicted_yield_tonnes_per_hectare,
                    predicted_at = EXCLUDED.predicted_at,
                    confidence_score = EXCLUDED.confidence_score,
                    input_features = EXCLUDED.input_features
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(prediction.crop_cycle_id)
        .bind(&prediction.model_version)
        .bind(prediction.predicted_yield_tonnes_per_hectare)
        .bind(prediction.predicted_at)
        .bind(prediction.confidence_score)
        .bind(&prediction.input_features)
        .fetch_one(&self.db)
        .await?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    /// Predictions for a crop cycle across model versions, newest first
    pub async fn predictions_for_cycle(&self, crop_cycle_id: i64) -> AppResult<Vec<YieldPrediction>> {
        let rows = sqlx::query_as::<_, YieldPredictionRow>(
            r#"
            SELECT id, crop_cycle_id, model_version, predicted_yield_tonnes_per_hectare,
                   predicted_at, confidence_score, input_features
            FROM yield_predictions
            WHERE crop_cycle_id = $1
            ORDER BY predicted_at DESC
            "#,
        )
        .bind(crop_cycle_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(YieldPrediction::from).collect())
    }
}
