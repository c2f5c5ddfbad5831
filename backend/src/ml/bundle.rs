//! Versioned model bundles on disk
//!
//! A bundle is three JSON files sharing one version suffix:
//! `yield_prediction_model_<v>.json`, `yield_feature_scaler_<v>.json` and
//! `yield_model_feature_names_<v>.json`. They are loaded together or not at
//! all; a partial set means the version is unavailable.

use serde::{de::DeserializeOwned, Serialize};
use shared::{FeatureVocabulary, ModelVersion};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::{Regressor, StandardScaler};
use crate::error::{AppError, AppResult};

const MODEL_PREFIX: &str = "yield_prediction_model_";
const SCALER_PREFIX: &str = "yield_feature_scaler_";
const VOCABULARY_PREFIX: &str = "yield_model_feature_names_";
const EXTENSION: &str = ".json";

/// The three artifacts making up a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Scaler,
    Vocabulary,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Model,
        ArtifactKind::Scaler,
        ArtifactKind::Vocabulary,
    ];

    fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Model => MODEL_PREFIX,
            ArtifactKind::Scaler => SCALER_PREFIX,
            ArtifactKind::Vocabulary => VOCABULARY_PREFIX,
        }
    }

    pub fn file_name(&self, version: &str) -> String {
        format!("{}{}{}", self.prefix(), version, EXTENSION)
    }
}

/// A complete, internally consistent model bundle
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    pub version: String,
    pub scaler: StandardScaler,
    pub regressor: Regressor,
    pub vocabulary: FeatureVocabulary,
}

impl ModelBundle {
    /// Assemble a bundle, checking the three parts agree on the feature count
    pub fn new(
        version: impl Into<String>,
        scaler: StandardScaler,
        regressor: Regressor,
        vocabulary: FeatureVocabulary,
    ) -> AppResult<Self> {
        let version = version.into();
        let invalid = |message: String| AppError::ArtifactInvalid {
            version: version.clone(),
            message,
        };

        scaler.check_shape().map_err(invalid)?;
        if scaler.n_features() != vocabulary.len() {
            return Err(invalid(format!(
                "scaler expects {} features, vocabulary lists {}",
                scaler.n_features(),
                vocabulary.len()
            )));
        }
        regressor.check(vocabulary.len()).map_err(invalid)?;

        Ok(Self {
            version,
            scaler,
            regressor,
            vocabulary,
        })
    }

    /// Scale then regress; one yield-per-hectare value per row
    pub fn predict(&self, rows: &[Vec<f64>]) -> AppResult<Vec<f64>> {
        let scaled = self.scaler.transform(rows)?;
        let predictions = self.regressor.predict(&scaled)?;
        if predictions.len() != rows.len() {
            return Err(AppError::Internal(format!(
                "model returned {} predictions for {} rows",
                predictions.len(),
                rows.len()
            )));
        }
        Ok(predictions)
    }
}

/// Versions become file name suffixes and must stay inside the directory
fn check_version(version: &str) -> AppResult<()> {
    if version.is_empty() || version.contains(['/', '\\']) || version.contains("..") {
        return Err(AppError::ValidationError(format!(
            "invalid model version '{}'",
            version
        )));
    }
    Ok(())
}

/// Result of probing a version on disk
#[derive(Debug)]
pub enum BundleState {
    Complete(ModelBundle),
    Absent { missing: Vec<ArtifactKind> },
}

/// Directory of versioned model bundles
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, kind: ArtifactKind, version: &str) -> PathBuf {
        self.dir.join(kind.file_name(version))
    }

    /// Check which artifacts exist and load the bundle when all three do
    pub fn probe(&self, version: &str) -> AppResult<BundleState> {
        check_version(version)?;
        let missing: Vec<ArtifactKind> = ArtifactKind::ALL
            .into_iter()
            .filter(|kind| !self.path(*kind, version).is_file())
            .collect();
        if !missing.is_empty() {
            return Ok(BundleState::Absent { missing });
        }

        let regressor: Regressor = self.read_json(ArtifactKind::Model, version)?;
        let scaler: StandardScaler = self.read_json(ArtifactKind::Scaler, version)?;
        let vocabulary: FeatureVocabulary = self.read_json(ArtifactKind::Vocabulary, version)?;

        ModelBundle::new(version, scaler, regressor, vocabulary).map(BundleState::Complete)
    }

    /// Load a complete bundle or fail with the list of missing artifacts
    pub fn load(&self, version: &str) -> AppResult<ModelBundle> {
        match self.probe(version)? {
            BundleState::Complete(bundle) => {
                info!(
                    version,
                    features = bundle.vocabulary.len(),
                    "Model bundle loaded"
                );
                Ok(bundle)
            }
            BundleState::Absent { missing } => {
                error!(version, ?missing, dir = %self.dir.display(), "Model artifacts missing");
                Err(AppError::ArtifactMissing {
                    version: version.to_string(),
                    missing,
                })
            }
        }
    }

    /// Write a bundle; the vocabulary file lands last so readers never see
    /// a vocabulary without its model and scaler
    pub fn save(&self, bundle: &ModelBundle) -> AppResult<()> {
        check_version(&bundle.version)?;
        fs::create_dir_all(&self.dir)?;
        self.write_json(ArtifactKind::Model, &bundle.version, &bundle.regressor)?;
        self.write_json(ArtifactKind::Scaler, &bundle.version, &bundle.scaler)?;
        self.write_json(ArtifactKind::Vocabulary, &bundle.version, &bundle.vocabulary)?;
        info!(version = %bundle.version, dir = %self.dir.display(), "Model bundle saved");
        Ok(())
    }

    /// Versions for which all three artifacts are present
    pub fn complete_versions(&self) -> AppResult<Vec<ModelVersion>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let version = name
                .strip_prefix(VOCABULARY_PREFIX)
                .and_then(|rest| rest.strip_suffix(EXTENSION));
            if let Some(version) = version.filter(|v| !v.is_empty()) {
                let complete = ArtifactKind::ALL
                    .iter()
                    .all(|kind| self.path(*kind, version).is_file());
                if complete {
                    versions.push(ModelVersion::new(version));
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// The newest version with a complete artifact set
    pub fn latest_version(&self) -> AppResult<ModelVersion> {
        self.complete_versions()?
            .pop()
            .ok_or_else(|| AppError::NoModelAvailable(self.dir.display().to_string()))
    }

    fn read_json<T: DeserializeOwned>(&self, kind: ArtifactKind, version: &str) -> AppResult<T> {
        let path = self.path(kind, version);
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| AppError::ArtifactInvalid {
            version: version.to_string(),
            message: format!("{}: {}", path.display(), e),
        })
    }

    fn write_json<T: Serialize>(&self, kind: ArtifactKind, version: &str, value: &T) -> AppResult<()> {
        let path = self.path(kind, version);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
