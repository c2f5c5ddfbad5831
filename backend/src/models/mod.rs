//! Domain models for the Field Yield Platform
//!
//! Re-exports models from the shared crate

pub use shared::models::*;
