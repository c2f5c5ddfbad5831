//! Domain models for the Field Yield Platform

mod crop_cycle;
mod farm;
mod features;
mod prediction;
mod sensor;

pub use crop_cycle::*;
pub use farm::*;
pub use features::*;
pub use prediction::*;
pub use sensor::*;
