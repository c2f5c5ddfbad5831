//! Field Yield Platform batch jobs
//!
//! Feature engineering over crop cycles and sensor history, batch yield
//! prediction with versioned model bundles, and the training-set export
//! those bundles are fitted on.

pub mod config;
pub mod error;
pub mod ml;
pub mod models;
pub mod services;
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
