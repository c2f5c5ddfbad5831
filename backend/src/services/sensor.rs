//! Sensor reading storage and device attribution

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use shared::{field_id_from_device_id, validate_sensor_reading, TimeWindow};

use crate::error::{AppError, AppResult};
use crate::models::{NewSensorReading, SensorDevice, SensorReading};

/// Sensor service over the `sensor_readings` and `sensor_devices` tables
#[derive(Clone)]
pub struct SensorReadingService {
    db: PgPool,
}

/// Database row for a sensor reading
#[derive(Debug, Clone, sqlx::FromRow)]
struct SensorReadingRow {
    pub id: i64,
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub custom_data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl From<SensorReadingRow> for SensorReading {
    fn from(row: SensorReadingRow) -> Self {
        Self {
            id: row.id,
            device_id: row.device_id,
            temperature: row.temperature,
            humidity: row.humidity,
            soil_moisture: row.soil_moisture,
            custom_data: row.custom_data,
            timestamp: row.timestamp,
            received_at: row.received_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SensorDeviceRow {
    pub device_id: String,
    pub field_id: i64,
    pub registered_at: DateTime<Utc>,
}

impl From<SensorDeviceRow> for SensorDevice {
    fn from(row: SensorDeviceRow) -> Self {
        Self {
            device_id: row.device_id,
            field_id: row.field_id,
            registered_at: row.registered_at,
        }
    }
}

impl SensorReadingService {
    /// Create a new SensorReadingService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Store a reading and attribute its device from the naming convention
    ///
    /// Devices already registered keep their mapping; a device that does not
    /// follow the convention is stored unattributed and will not contribute
    /// to any field until registered explicitly.
    pub async fn record_reading(&self, input: NewSensorReading) -> AppResult<SensorReading> {
        validate_sensor_reading(&input).map_err(AppError::ValidationError)?;

        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, SensorReadingRow>(
            r#"
            INSERT INTO sensor_readings (device_id, temperature, humidity, soil_moisture,
                                         custom_data, timestamp)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()))
            RETURNING id, device_id, temperature, humidity, soil_moisture,
                      custom_data, timestamp, received_at
            "#,
        )
        .bind(&input.device_id)
        .bind(input.temperature)
        .bind(input.humidity)
        .bind(input.soil_moisture)
        .bind(&input.custom_data)
        .bind(input.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(field_id) = field_id_from_device_id(&input.device_id) {
            // Only attribute to fields that exist; unknown ids stay unmapped
            sqlx::query(
                r#"
                INSERT INTO sensor_devices (device_id, field_id)
                SELECT $1, id FROM fields WHERE id = $2
                ON CONFLICT (device_id) DO NOTHING
                "#,
            )
            .bind(&input.device_id)
            .bind(field_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(SensorReading::from(row))
    }

    /// Attribute a device to a field, replacing any earlier attribution
    pub async fn register_device(&self, device_id: &str, field_id: i64) -> AppResult<SensorDevice> {
        if device_id.trim().is_empty() {
            return Err(AppError::ValidationError("Device id cannot be blank".to_string()));
        }

        let field_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM fields WHERE id = $1)",
        )
        .bind(field_id)
        .fetch_one(&self.db)
        .await?;

        if !field_exists {
            return Err(AppError::NotFound("Field".to_string()));
        }

        let row = sqlx::query_as::<_, SensorDeviceRow>(
            r#"
            INSERT INTO sensor_devices (device_id, field_id)
            VALUES ($1, $2)
            ON CONFLICT (device_id) DO UPDATE
                SET field_id = EXCLUDED.field_id, registered_at = NOW()
            RETURNING device_id, field_id, registered_at
            "#,
        )
        .bind(device_id)
        .bind(field_id)
        .fetch_one(&self.db)
        .await?;

        Ok(SensorDevice::from(row))
    }

    /// Readings from devices attributed to the field, inside the window
    pub async fn readings_for_field(
        &self,
        field_id: i64,
        window: TimeWindow,
    ) -> AppResult<Vec<SensorReading>> {
        let rows = sqlx::query_as::<_, SensorReadingRow>(
            r#"
            SELECT r.id, r.device_id, r.temperature, r.humidity, r.soil_moisture,
                   r.custom_data, r.timestamp, r.received_at
            FROM sensor_readings r
            JOIN sensor_devices d ON d.device_id = r.device_id
            WHERE d.field_id = $1
              AND r.timestamp >= $2
              AND r.timestamp <= $3
            ORDER BY r.timestamp
            "#,
        )
        .bind(field_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(SensorReading::from).collect())
    }
}
