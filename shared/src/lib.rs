//! Shared types and models for the Field Yield Platform
//!
//! This crate contains the domain model (farms, fields, crop cycles, sensor
//! readings, predictions) and the feature vocabulary contract shared between
//! the batch predictor, the training-set export and ingestion.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
