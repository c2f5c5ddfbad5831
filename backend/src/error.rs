//! Error handling for the Field Yield Platform batch jobs
//!
//! Run-level errors abort a batch; cycle-level errors are recorded in the run
//! summary and processing moves on to the next cycle.

use thiserror::Error;

use crate::ml::ArtifactKind;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Model artifact errors
    #[error("Model artifacts missing for version {version}: {missing:?}")]
    ArtifactMissing {
        version: String,
        missing: Vec<ArtifactKind>,
    },

    #[error("Model artifacts for version {version} are inconsistent: {message}")]
    ArtifactInvalid { version: String, message: String },

    #[error("No complete model bundle found in {0}")]
    NoModelAvailable(String),

    // Feature pipeline errors
    #[error("Features {columns:?} are missing for every cycle in the batch")]
    FeatureUnrecoverable {
        columns: Vec<String>,
        crop_cycle_ids: Vec<i64>,
    },

    #[error("Model input error: {0}")]
    ModelInput(String),

    // Storage errors
    #[error("Failed to store prediction for crop cycle {crop_cycle_id}: {source}")]
    StorageWriteFailure {
        crop_cycle_id: i64,
        #[source]
        source: Box<AppError>,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    // Validation errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Ambient errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code used in logs and run summaries
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ArtifactMissing { .. } => "ARTIFACT_MISSING",
            AppError::ArtifactInvalid { .. } => "ARTIFACT_INVALID",
            AppError::NoModelAvailable(_) => "NO_MODEL_AVAILABLE",
            AppError::FeatureUnrecoverable { .. } => "FEATURE_UNRECOVERABLE",
            AppError::ModelInput(_) => "MODEL_INPUT_ERROR",
            AppError::StorageWriteFailure { .. } => "STORAGE_WRITE_FAILURE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::MigrationError(_) => "MIGRATION_ERROR",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Csv(_) => "CSV_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error concerns a subset of cycles rather than the whole run
    pub fn is_cycle_scoped(&self) -> bool {
        matches!(
            self,
            AppError::FeatureUnrecoverable { .. } | AppError::StorageWriteFailure { .. }
        )
    }

    /// Whether storage itself is unreachable, as opposed to one statement
    /// being rejected
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            AppError::DatabaseError(
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::WorkerCrashed
            )
        )
    }

    pub(crate) fn storage_write(crop_cycle_id: i64, source: AppError) -> Self {
        AppError::StorageWriteFailure {
            crop_cycle_id,
            source: Box::new(source),
        }
    }
}

/// Result type alias for services and the pipeline
pub type AppResult<T> = Result<T, AppError>;
