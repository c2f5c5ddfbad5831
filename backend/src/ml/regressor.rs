//! Inference-only regressors deserialized from training artifacts

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Marker for a missing child in the flattened tree layout
const LEAF: i64 = -1;

/// A fitted regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regressor {
    /// Ordinary linear model over scaled features
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    /// Averaging ensemble of regression trees
    RandomForest { trees: Vec<RegressionTree> },
}

/// One regression tree in flattened array form
///
/// Node `i` splits on `feature[i]` at `threshold[i]`: rows with
/// `x[feature] <= threshold` go to `children_left[i]`, others to
/// `children_right[i]`. A node whose left child is -1 is a leaf and
/// predicts `value[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl RegressionTree {
    fn node_count(&self) -> usize {
        self.value.len()
    }

    fn check(&self, n_features: usize) -> Result<(), String> {
        let n = self.node_count();
        if n == 0 {
            return Err("tree has no nodes".to_string());
        }
        if [
            self.children_left.len(),
            self.children_right.len(),
            self.feature.len(),
            self.threshold.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err("tree arrays have different lengths".to_string());
        }
        for node in 0..n {
            let left = self.children_left[node];
            if left == LEAF {
                continue;
            }
            let right = self.children_right[node];
            // Children always come after their parent, which rules out cycles
            let in_range = |child: i64| child > node as i64 && (child as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(format!("node {} has an out-of-range child", node));
            }
            let feature = self.feature[node];
            if feature < 0 || feature as usize >= n_features {
                return Err(format!(
                    "node {} splits on feature {} but the model has {} features",
                    node, feature, n_features
                ));
            }
        }
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            let x = row[self.feature[node] as usize];
            node = if x <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        self.value[node]
    }
}

impl Regressor {
    /// Verify the regressor can consume rows of `n_features` values
    pub fn check(&self, n_features: usize) -> Result<(), String> {
        match self {
            Regressor::Linear { coefficients, .. } => {
                if coefficients.len() != n_features {
                    return Err(format!(
                        "linear model has {} coefficients for {} features",
                        coefficients.len(),
                        n_features
                    ));
                }
                Ok(())
            }
            Regressor::RandomForest { trees } => {
                if trees.is_empty() {
                    return Err("forest has no trees".to_string());
                }
                trees
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, tree)| tree.check(n_features).map_err(|e| format!("tree {}: {}", i, e)))
            }
        }
    }

    /// Predict one value per scaled input row
    pub fn predict(&self, rows: &[Vec<f64>]) -> AppResult<Vec<f64>> {
        rows.iter()
            .map(|row| match self {
                Regressor::Linear {
                    coefficients,
                    intercept,
                } => {
                    if row.len() != coefficients.len() {
                        return Err(AppError::ModelInput(format!(
                            "expected {} features, got {}",
                            coefficients.len(),
                            row.len()
                        )));
                    }
                    Ok(intercept + row.iter().zip(coefficients).map(|(x, c)| x * c).sum::<f64>())
                }
                Regressor::RandomForest { trees } => {
                    if trees.is_empty() {
                        return Err(AppError::ModelInput("forest has no trees".to_string()));
                    }
                    let total: f64 = trees.iter().map(|tree| tree.predict_row(row)).sum();
                    Ok(total / trees.len() as f64)
                }
            })
            .collect()
    }
}
