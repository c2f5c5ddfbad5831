//! Batch yield prediction for active crop cycles

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::ml::ModelBundle;
use crate::models::{PredictionUpsert, UpsertOutcome};
use crate::services::alignment::AlignedMatrix;
use crate::services::features::FeatureService;
use crate::storage::PipelineStore;

/// Counts reported at the end of a run
///
/// `attempted` is every active cycle the run built features for; each one
/// ends up succeeded, failed or excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub model_version: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub excluded: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl RunSummary {
    fn new(model_version: &str) -> Self {
        Self {
            model_version: model_version.to_string(),
            ..Self::default()
        }
    }

    /// Every attempted cycle got a stored prediction
    pub fn is_clean(&self) -> bool {
        self.succeeded == self.attempted
    }

    /// Process exit status: 0 clean, 2 partially failed
    pub fn exit_code(&self) -> u8 {
        if self.is_clean() {
            0
        } else {
            2
        }
    }
}

/// Predicts and stores yields for every active cycle with one model bundle
pub struct BatchPredictor<'a> {
    store: &'a dyn PipelineStore,
    bundle: &'a ModelBundle,
}

impl<'a> BatchPredictor<'a> {
    pub fn new(store: &'a dyn PipelineStore, bundle: &'a ModelBundle) -> Self {
        Self { store, bundle }
    }

    /// Run one batch as of `now`
    ///
    /// Read failures and lost connections abort the run. Unrecoverable
    /// features exclude the affected cycles, and a rejected write only fails
    /// its own cycle; both are reflected in the summary instead of the
    /// result.
    pub async fn run(&self, now: DateTime<Utc>) -> AppResult<RunSummary> {
        let mut summary = RunSummary::new(&self.bundle.version);

        let rows = FeatureService::new(self.store).active_features(now).await?;
        summary.attempted = rows.len();
        if rows.is_empty() {
            info!("No active crop cycles, nothing to predict");
            return Ok(summary);
        }

        let aligned = AlignedMatrix::align(&rows, &self.bundle.vocabulary);
        let matrix = match aligned.impute() {
            Ok(matrix) => matrix,
            Err(err) if err.is_cycle_scoped() => {
                if let AppError::FeatureUnrecoverable { crop_cycle_ids, .. } = &err {
                    summary.excluded = crop_cycle_ids.len();
                }
                warn!(code = err.code(), error = %err, "Excluding cycles from prediction");
                return Ok(summary);
            }
            Err(err) => return Err(err),
        };

        let predictions = self.bundle.predict(&matrix)?;

        for (row, predicted) in rows.iter().zip(predictions) {
            let upsert = PredictionUpsert {
                crop_cycle_id: row.crop_cycle_id,
                model_version: self.bundle.version.clone(),
                predicted_yield_tonnes_per_hectare: predicted,
                confidence_score: None,
                input_features: row.to_vector(&self.bundle.vocabulary).to_snapshot(),
                predicted_at: now,
            };

            match self.store.upsert_prediction(&upsert).await {
                Ok(outcome) => {
                    summary.succeeded += 1;
                    match outcome {
                        UpsertOutcome::Inserted => summary.inserted += 1,
                        UpsertOutcome::Updated => summary.updated += 1,
                    }
                }
                Err(source) if source.is_connection_loss() => {
                    error!(
                        code = source.code(),
                        crop_cycle_id = row.crop_cycle_id,
                        error = %source,
                        "Storage unavailable, aborting run"
                    );
                    return Err(source);
                }
                Err(source) => {
                    let err = AppError::storage_write(row.crop_cycle_id, source);
                    error!(
                        code = err.code(),
                        crop_cycle_id = row.crop_cycle_id,
                        error = %err,
                        "Prediction not stored"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            excluded = summary.excluded,
            inserted = summary.inserted,
            updated = summary.updated,
            "Batch prediction finished"
        );
        Ok(summary)
    }
}
