//! Standard scaler: per-column centering and scaling fitted at training time

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Fitted standardization parameters, one entry per feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn check_shape(&self) -> Result<(), String> {
        if self.mean.len() != self.scale.len() {
            return Err(format!(
                "scaler has {} means but {} scales",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err("scaler parameters must be finite".to_string());
        }
        Ok(())
    }

    /// Apply `(x - mean) / scale` to every row
    ///
    /// A zero scale (constant training column) divides by one. Non-finite
    /// inputs are rejected rather than propagated into predictions.
    pub fn transform(&self, rows: &[Vec<f64>]) -> AppResult<Vec<Vec<f64>>> {
        rows.iter()
            .enumerate()
            .map(|(row_index, row)| {
                if row.len() != self.n_features() {
                    return Err(AppError::ModelInput(format!(
                        "row {} has {} features, scaler expects {}",
                        row_index,
                        row.len(),
                        self.n_features()
                    )));
                }
                row.iter()
                    .zip(self.mean.iter().zip(&self.scale))
                    .enumerate()
                    .map(|(col, (&x, (&mean, &scale)))| {
                        if !x.is_finite() {
                            return Err(AppError::ModelInput(format!(
                                "row {} column {} is not a finite number",
                                row_index, col
                            )));
                        }
                        let divisor = if scale == 0.0 { 1.0 } else { scale };
                        Ok((x - mean) / divisor)
                    })
                    .collect()
            })
            .collect()
    }
}
