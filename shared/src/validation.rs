//! Validation utilities for the Field Yield Platform
//!
//! Includes the device naming convention that attributes telemetry to fields.

use rust_decimal::Decimal;
use validator::Validate;

use crate::models::NewSensorReading;

// ============================================================================
// Device Attribution
// ============================================================================

const FIELD_MARKER: &str = "field_";

/// Extract the field id encoded in a device identifier
///
/// Devices are named with a `field_<id>` segment anywhere in the identifier,
/// e.g. `soil_probe_field_12_a`. The digits must end at a non-digit or at the
/// end of the string, so `field_1` never matches `field_12`.
pub fn field_id_from_device_id(device_id: &str) -> Option<i64> {
    let mut rest = device_id;
    while let Some(pos) = rest.find(FIELD_MARKER) {
        let after = &rest[pos + FIELD_MARKER.len()..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            if let Ok(id) = digits.parse::<i64>() {
                return Some(id);
            }
        }
        rest = after;
    }
    None
}

/// Check whether a device identifier follows the convention for this field
pub fn device_matches_field(device_id: &str, field_id: i64) -> bool {
    field_id_from_device_id(device_id) == Some(field_id)
}

// ============================================================================
// Farm Record Validations
// ============================================================================

/// Validate field area, which must be positive to compute yield per hectare
pub fn validate_field_area(area_hectares: Decimal) -> Result<(), &'static str> {
    if area_hectares <= Decimal::ZERO {
        return Err("Field area must be greater than 0 hectares");
    }
    Ok(())
}

/// Validate an incoming sensor reading
pub fn validate_sensor_reading(reading: &NewSensorReading) -> Result<(), String> {
    reading.validate().map_err(|e| e.to_string())?;
    if reading.device_id.trim().is_empty() {
        return Err("Device id cannot be blank".to_string());
    }
    let non_finite = [reading.temperature, reading.humidity, reading.soil_moisture]
        .into_iter()
        .flatten()
        .any(|v| !v.is_finite());
    if non_finite {
        return Err("Sensor values must be finite numbers".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(device_id: &str, humidity: Option<f64>) -> NewSensorReading {
        NewSensorReading {
            device_id: device_id.to_string(),
            temperature: Some(21.5),
            humidity,
            soil_moisture: Some(0.4),
            custom_data: None,
            timestamp: None,
        }
    }

    // ========================================================================
    // Device Attribution Tests
    // ========================================================================

    #[test]
    fn test_field_id_from_device_id() {
        assert_eq!(field_id_from_device_id("field_12"), Some(12));
        assert_eq!(field_id_from_device_id("soil_probe_field_7_a"), Some(7));
        assert_eq!(field_id_from_device_id("station-field_3"), Some(3));
    }

    #[test]
    fn test_field_id_requires_digits() {
        assert_eq!(field_id_from_device_id("device_soil_A1"), None);
        assert_eq!(field_id_from_device_id("field_"), None);
        assert_eq!(field_id_from_device_id("field_x_field_9"), Some(9));
    }

    #[test]
    fn test_field_prefix_does_not_match_longer_id() {
        assert!(device_matches_field("probe_field_12", 12));
        assert!(!device_matches_field("probe_field_12", 1));
        assert!(!device_matches_field("probe_field_1", 12));
    }

    // ========================================================================
    // Record Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_field_area() {
        assert!(validate_field_area(Decimal::from(10)).is_ok());
        assert!(validate_field_area(Decimal::ZERO).is_err());
        assert!(validate_field_area(Decimal::from(-1)).is_err());
    }

    #[test]
    fn test_validate_sensor_reading() {
        assert!(validate_sensor_reading(&reading("probe_field_1", Some(55.0))).is_ok());
        assert!(validate_sensor_reading(&reading("probe_field_1", Some(120.0))).is_err());
        assert!(validate_sensor_reading(&reading("", None)).is_err());
        assert!(validate_sensor_reading(&reading("   ", None)).is_err());
    }

    #[test]
    fn test_validate_sensor_reading_rejects_nan() {
        let mut input = reading("probe_field_1", None);
        input.temperature = Some(f64::NAN);
        assert!(validate_sensor_reading(&input).is_err());
    }
}
