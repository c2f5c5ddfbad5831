//! Crop cycle queries for the feature builders

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::CycleContext;

/// Crop cycle service over the `crop_cycles` and `fields` tables
#[derive(Clone)]
pub struct CropCycleService {
    db: PgPool,
}

/// Database row for a crop cycle joined to its field
#[derive(Debug, Clone, sqlx::FromRow)]
struct CycleContextRow {
    pub crop_cycle_id: i64,
    pub field_id: i64,
    pub crop_type: String,
    pub planting_date: NaiveDate,
    pub actual_harvest_date: Option<NaiveDate>,
    pub actual_yield_tonnes: Option<Decimal>,
    pub field_area_hectares: Decimal,
    pub soil_type: Option<String>,
}

impl From<CycleContextRow> for CycleContext {
    fn from(row: CycleContextRow) -> Self {
        Self {
            crop_cycle_id: row.crop_cycle_id,
            field_id: row.field_id,
            crop_type: row.crop_type,
            planting_date: row.planting_date,
            actual_harvest_date: row.actual_harvest_date,
            actual_yield_tonnes: row.actual_yield_tonnes,
            field_area_hectares: row.field_area_hectares,
            soil_type: row.soil_type,
        }
    }
}

impl CropCycleService {
    /// Create a new CropCycleService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Area of the field a crop cycle is planted on
    pub async fn field_area(&self, crop_cycle_id: i64) -> AppResult<Decimal> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT f.area_hectares
            FROM crop_cycles c
            JOIN fields f ON f.id = c.field_id
            WHERE c.id = $1
            "#,
        )
        .bind(crop_cycle_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Crop cycle".to_string()))
    }

    /// Cycles still in the ground, joined to field area and soil type
    pub async fn active_cycles(&self) -> AppResult<Vec<CycleContext>> {
        let rows = sqlx::query_as::<_, CycleContextRow>(
            r#"
            SELECT c.id AS crop_cycle_id, c.field_id, c.crop_type, c.planting_date,
                   c.actual_harvest_date, c.actual_yield_tonnes,
                   f.area_hectares AS field_area_hectares, f.soil_type
            FROM crop_cycles c
            JOIN fields f ON f.id = c.field_id
            WHERE c.actual_harvest_date IS NULL
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(CycleContext::from).collect())
    }

    /// Harvested cycles that carry a yield outcome
    pub async fn completed_cycles(&self) -> AppResult<Vec<CycleContext>> {
        let rows = sqlx::query_as::<_, CycleContextRow>(
            r#"
            SELECT c.id AS crop_cycle_id, c.field_id, c.crop_type, c.planting_date,
                   c.actual_harvest_date, c.actual_yield_tonnes,
                   f.area_hectares AS field_area_hectares, f.soil_type
            FROM crop_cycles c
            JOIN fields f ON f.id = c.field_id
            WHERE c.actual_harvest_date IS NOT NULL
              AND c.actual_yield_tonnes IS NOT NULL
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(CycleContext::from).collect())
    }
}
