//! Sensor telemetry models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// An immutable sensor event as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: i64,
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub custom_data: Option<serde_json::Value>,
    /// Device-reported event time
    pub timestamp: DateTime<Utc>,
    /// Server-assigned receipt time
    pub received_at: DateTime<Utc>,
}

/// Input for recording a sensor reading
///
/// Mirrors the telemetry payload published by field devices.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewSensorReading {
    #[validate(length(min = 1, max = 255))]
    pub device_id: String,
    pub temperature: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub custom_data: Option<serde_json::Value>,
    /// Defaults to receipt time when the device omits it
    pub timestamp: Option<DateTime<Utc>>,
}

/// Explicit attribution of a device to the field it measures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorDevice {
    pub device_id: String,
    pub field_id: i64,
    pub registered_at: DateTime<Utc>,
}
