//! Services for the Field Yield Platform batch jobs

pub mod alignment;
pub mod batch;
pub mod crop_cycle;
pub mod dataset;
pub mod features;
pub mod prediction;
pub mod sensor;

pub use alignment::AlignedMatrix;
pub use batch::{BatchPredictor, RunSummary};
pub use crop_cycle::CropCycleService;
pub use dataset::{export_to_csv, write_training_csv};
pub use features::{engineer_features, FeatureService, TrainingRow, TrainingSet};
pub use prediction::PredictionService;
pub use sensor::SensorReadingService;
