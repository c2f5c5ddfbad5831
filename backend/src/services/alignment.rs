//! Reconcile feature rows with a model's vocabulary and fill gaps
//!
//! Missing values are replaced by the column mean over the current batch.
//! This is an approximation of training-time imputation: the batch mean is
//! not the training mean, but it keeps predictions available when a few
//! cycles lack sensor data.

use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{FeatureRow, FeatureVocabulary};

/// Feature rows projected onto a vocabulary, gaps still open
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMatrix {
    pub columns: Vec<String>,
    /// Row `i` belongs to `crop_cycle_ids[i]`
    pub crop_cycle_ids: Vec<i64>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl AlignedMatrix {
    /// Exactly the vocabulary's columns, in its order; extra columns dropped
    pub fn align(rows: &[FeatureRow], vocabulary: &FeatureVocabulary) -> Self {
        let columns = vocabulary.names().to_vec();
        let crop_cycle_ids = rows.iter().map(|row| row.crop_cycle_id).collect();
        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|name| row.get(name).flatten())
                    .collect()
            })
            .collect();

        Self {
            columns,
            crop_cycle_ids,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Columns with no value in any row
    pub fn unrecoverable_columns(&self) -> Vec<String> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        self.columns
            .iter()
            .enumerate()
            .filter(|(j, _)| self.rows.iter().all(|row| row[*j].is_none()))
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Replace each gap with its column's batch mean
    ///
    /// Fails with `FeatureUnrecoverable` when some column has no value to
    /// average, naming every such column and every cycle in the batch.
    pub fn impute(&self) -> AppResult<Vec<Vec<f64>>> {
        let unrecoverable = self.unrecoverable_columns();
        if !unrecoverable.is_empty() {
            return Err(AppError::FeatureUnrecoverable {
                columns: unrecoverable,
                crop_cycle_ids: self.crop_cycle_ids.clone(),
            });
        }

        let means: Vec<f64> = (0..self.columns.len())
            .map(|j| {
                let present: Vec<f64> = self.rows.iter().filter_map(|row| row[j]).collect();
                present.iter().sum::<f64>() / present.len() as f64
            })
            .collect();

        let mut filled = 0usize;
        let matrix = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&means)
                    .map(|(value, mean)| {
                        value.unwrap_or_else(|| {
                            filled += 1;
                            *mean
                        })
                    })
                    .collect()
            })
            .collect();

        if filled > 0 {
            debug!(filled, "Imputed missing feature values with batch means");
        }
        Ok(matrix)
    }
}
