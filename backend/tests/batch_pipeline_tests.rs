//! End-to-end tests for the yield prediction pipeline
//!
//! Runs the feature builders, alignment, model bundle and upsert against the
//! in-memory store and a bundle saved to a temporary artifact directory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

use yield_batch::ml::{ArtifactStore, ModelBundle, RegressionTree, Regressor, StandardScaler};
use yield_batch::models::feature_names::*;
use yield_batch::models::{
    CycleContext, FeatureRow, FeatureVocabulary, NewSensorReading, PredictionUpsert,
    SensorReading, UpsertOutcome, YieldPrediction,
};
use yield_batch::services::features::ExclusionReason;
use yield_batch::services::{export_to_csv, AlignedMatrix, BatchPredictor, FeatureService};
use yield_batch::storage::{MemoryStore, PipelineStore};
use yield_batch::{AppError, AppResult};
use shared::TimeWindow;

// ============================================================================
// Helpers
// ============================================================================

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn run_time() -> DateTime<Utc> {
    at(2024, 6, 1, 2)
}

fn reading(device_id: &str, timestamp: DateTime<Utc>, temperature: f64) -> NewSensorReading {
    NewSensorReading {
        device_id: device_id.to_string(),
        temperature: Some(temperature),
        humidity: Some(65.0),
        soil_moisture: Some(0.3),
        custom_data: None,
        timestamp: Some(timestamp),
    }
}

fn vocabulary(names: &[&str]) -> FeatureVocabulary {
    FeatureVocabulary::new(names.iter().map(|n| n.to_string()).collect()).unwrap()
}

/// Bundle over [avg_temp, min_temp, max_temp, field_area_hectares] that
/// predicts avg_temp / 10 t/ha
fn temperature_bundle(version: &str) -> ModelBundle {
    ModelBundle::new(
        version,
        StandardScaler {
            mean: vec![0.0; 4],
            scale: vec![1.0; 4],
        },
        Regressor::Linear {
            coefficients: vec![0.1, 0.0, 0.0, 0.0],
            intercept: 0.0,
        },
        vocabulary(&[AVG_TEMP, MIN_TEMP, MAX_TEMP, FIELD_AREA_HECTARES]),
    )
    .unwrap()
}

/// Saves the bundle and loads it back, the way a run obtains it
fn load_bundle(bundle: ModelBundle) -> (tempfile::TempDir, ModelBundle) {
    let dir = tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    artifacts.save(&bundle).unwrap();
    let loaded = artifacts.load(&bundle.version).unwrap();
    (dir, loaded)
}

/// Field 1 (10 ha) with active cycle 101 and readings at 20, 24 and 28 °C
async fn scenario_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_field(1, 1, Decimal::from(10), Some("loam")).await.unwrap();
    store.insert_crop_cycle(101, 1, "Maize", date(2024, 3, 1)).await.unwrap();
    for (day, temp) in [(2, 20.0), (3, 24.0), (4, 28.0)] {
        store
            .record_reading(reading("sensor_field_1", at(2024, 4, day, 12), temp))
            .await
            .unwrap();
    }
    store
}

/// Delegates to a memory store, failing chosen operations
struct FlakyStore {
    inner: MemoryStore,
    fail_upsert_for: Option<i64>,
    fail_reads: bool,
    storage_down: bool,
    writes: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_upsert_for: None,
            fail_reads: false,
            storage_down: false,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PipelineStore for FlakyStore {
    async fn active_cycles(&self) -> AppResult<Vec<CycleContext>> {
        if self.fail_reads {
            return Err(AppError::Internal("storage unavailable".to_string()));
        }
        self.inner.active_cycles().await
    }

    async fn completed_cycles(&self) -> AppResult<Vec<CycleContext>> {
        self.inner.completed_cycles().await
    }

    async fn readings_for_field(
        &self,
        field_id: i64,
        window: TimeWindow,
    ) -> AppResult<Vec<SensorReading>> {
        self.inner.readings_for_field(field_id, window).await
    }

    async fn upsert_prediction(&self, prediction: &PredictionUpsert) -> AppResult<UpsertOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.storage_down {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        if self.fail_upsert_for == Some(prediction.crop_cycle_id) {
            return Err(AppError::Internal("write rejected".to_string()));
        }
        self.inner.upsert_prediction(prediction).await
    }

    async fn predictions_for_cycle(&self, crop_cycle_id: i64) -> AppResult<Vec<YieldPrediction>> {
        self.inner.predictions_for_cycle(crop_cycle_id).await
    }
}

// ============================================================================
// Feature builders
// ============================================================================

#[cfg(test)]
mod feature_tests {
    use super::*;

    #[tokio::test]
    async fn test_scenario_row_aligns_to_model_columns() {
        let store = scenario_store().await;
        let rows = FeatureService::new(&store)
            .active_features(run_time())
            .await
            .unwrap();
        let aligned = AlignedMatrix::align(
            &rows,
            &vocabulary(&[AVG_TEMP, MIN_TEMP, MAX_TEMP, FIELD_AREA_HECTARES]),
        );

        assert_eq!(aligned.crop_cycle_ids, vec![101]);
        assert_eq!(aligned.impute().unwrap(), vec![vec![24.0, 20.0, 28.0, 10.0]]);
    }

    #[tokio::test]
    async fn test_cycle_without_readings_still_gets_a_row() {
        let store = MemoryStore::new();
        store.insert_field(1, 1, Decimal::from(10), None).await.unwrap();
        store.insert_crop_cycle(101, 1, "Maize", date(2024, 3, 1)).await.unwrap();

        let rows = FeatureService::new(&store)
            .active_features(run_time())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(AVG_TEMP), Some(None));
        assert_eq!(rows[0].get(FIELD_AREA_HECTARES), Some(Some(10.0)));
    }

    #[tokio::test]
    async fn test_readings_of_similarly_named_fields_stay_apart() {
        let store = MemoryStore::new();
        store.insert_field(1, 1, Decimal::from(10), None).await.unwrap();
        store.insert_field(12, 1, Decimal::from(4), None).await.unwrap();
        store.insert_crop_cycle(101, 1, "Maize", date(2024, 3, 1)).await.unwrap();
        store
            .record_reading(reading("sensor_field_1", at(2024, 4, 2, 12), 20.0))
            .await
            .unwrap();
        store
            .record_reading(reading("sensor_field_12", at(2024, 4, 2, 12), 35.0))
            .await
            .unwrap();

        let rows = FeatureService::new(&store)
            .active_features(run_time())
            .await
            .unwrap();
        assert_eq!(rows[0].get(MAX_TEMP), Some(Some(20.0)));
    }

    #[tokio::test]
    async fn test_readings_outside_window_are_ignored() {
        let store = scenario_store().await;
        store
            .record_reading(reading("sensor_field_1", at(2024, 2, 28, 12), 5.0))
            .await
            .unwrap();
        store
            .record_reading(reading("sensor_field_1", run_time() + Duration::hours(1), 40.0))
            .await
            .unwrap();

        let rows = FeatureService::new(&store)
            .active_features(run_time())
            .await
            .unwrap();
        assert_eq!(rows[0].get(MIN_TEMP), Some(Some(20.0)));
        assert_eq!(rows[0].get(MAX_TEMP), Some(Some(28.0)));
    }

    #[tokio::test]
    async fn test_training_set_labels_and_exclusions() {
        let store = MemoryStore::new();
        store.insert_field(1, 1, Decimal::from(10), None).await.unwrap();
        store.insert_field(2, 1, Decimal::from(5), None).await.unwrap();

        // Usable: readings on the harvest day count
        store.insert_crop_cycle(201, 1, "Maize", date(2023, 3, 1)).await.unwrap();
        store
            .record_harvest(201, date(2023, 7, 29), Some(Decimal::from(45)))
            .await
            .unwrap();
        store
            .record_reading(reading("sensor_field_1", at(2023, 7, 29, 18), 22.0))
            .await
            .unwrap();

        // Harvested the day it was planted
        store.insert_crop_cycle(202, 1, "Maize", date(2023, 8, 1)).await.unwrap();
        store
            .record_harvest(202, date(2023, 8, 1), Some(Decimal::from(10)))
            .await
            .unwrap();

        // No sensor history on field 2
        store.insert_crop_cycle(203, 2, "Rice", date(2023, 3, 1)).await.unwrap();
        store
            .record_harvest(203, date(2023, 6, 1), Some(Decimal::from(20)))
            .await
            .unwrap();

        // Harvested without a recorded yield: not a completed cycle
        store.insert_crop_cycle(204, 1, "Maize", date(2023, 9, 1)).await.unwrap();
        store.record_harvest(204, date(2023, 12, 1), None).await.unwrap();

        let set = FeatureService::new(&store).training_set().await.unwrap();

        assert_eq!(set.rows.len(), 1);
        let row = &set.rows[0];
        assert_eq!(row.crop_cycle_id(), 201);
        assert_eq!(row.target, 4.5);
        assert_eq!(row.features.get(CYCLE_DURATION_DAYS), Some(Some(150.0)));
        assert_eq!(
            set.excluded,
            vec![
                (202, ExclusionReason::NonPositiveDuration),
                (203, ExclusionReason::NoSensorData),
            ]
        );

        let csv = export_to_csv(&set.rows).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.lines().nth(1).unwrap().starts_with("201,22,22,22,65,0.3,"));
    }
}

// ============================================================================
// Batch runs
// ============================================================================

#[cfg(test)]
mod batch_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_stores_prediction_with_snapshot() {
        let store = scenario_store().await;
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let summary = BatchPredictor::new(&store, &bundle)
            .run(run_time())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.exit_code(), 0);

        let stored = store.predictions_for_cycle(101).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].model_version, "v1");
        assert!((stored[0].predicted_yield_tonnes_per_hectare - 2.4).abs() < 1e-9);
        assert_eq!(
            stored[0].input_features,
            serde_json::json!({
                "avg_temp": 24.0,
                "min_temp": 20.0,
                "max_temp": 28.0,
                "field_area_hectares": 10.0
            })
        );
    }

    #[tokio::test]
    async fn test_rerun_overwrites_instead_of_duplicating() {
        let store = scenario_store().await;
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));
        let predictor = BatchPredictor::new(&store, &bundle);

        let first = predictor.run(run_time()).await.unwrap();
        let second_run = run_time() + Duration::hours(24);
        let second = predictor.run(second_run).await.unwrap();

        assert_eq!((first.inserted, first.updated), (1, 0));
        assert_eq!((second.inserted, second.updated), (0, 1));
        assert_eq!(store.prediction_count().await, 1);

        let stored = store.predictions_for_cycle(101).await.unwrap();
        assert_eq!(stored[0].predicted_at, second_run);
    }

    #[tokio::test]
    async fn test_rerun_picks_up_new_readings() {
        let store = scenario_store().await;
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));
        let predictor = BatchPredictor::new(&store, &bundle);
        predictor.run(run_time()).await.unwrap();

        store
            .record_reading(reading("sensor_field_1", at(2024, 6, 1, 6), 32.0))
            .await
            .unwrap();
        let later = at(2024, 6, 2, 2);
        predictor.run(later).await.unwrap();

        let stored = store.predictions_for_cycle(101).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].predicted_at, later);
        // avg of 20, 24, 28, 32
        assert!((stored[0].predicted_yield_tonnes_per_hectare - 2.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_versions_are_stored_side_by_side() {
        let store = scenario_store().await;
        let (_dir1, v1) = load_bundle(temperature_bundle("v1"));
        let (_dir2, v2) = load_bundle(temperature_bundle("v2"));

        BatchPredictor::new(&store, &v1).run(run_time()).await.unwrap();
        BatchPredictor::new(&store, &v2)
            .run(run_time() + Duration::hours(1))
            .await
            .unwrap();

        let stored = store.predictions_for_cycle(101).await.unwrap();
        let versions: Vec<&str> = stored.iter().map(|p| p.model_version.as_str()).collect();
        assert_eq!(versions, vec!["v2", "v1"]);
    }

    #[tokio::test]
    async fn test_missing_sensor_data_is_imputed_from_batch() {
        let store = scenario_store().await;
        store.insert_field(2, 1, Decimal::from(6), None).await.unwrap();
        store.insert_crop_cycle(102, 2, "Maize", date(2024, 4, 1)).await.unwrap();
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let summary = BatchPredictor::new(&store, &bundle)
            .run(run_time())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 2);

        let stored = store.predictions_for_cycle(102).await.unwrap();
        assert!(stored[0].input_features["avg_temp"].is_null());
        assert_eq!(stored[0].input_features["field_area_hectares"], 6.0);
        // Only cycle 101 has temperatures, so its mean fills the gap
        assert!((stored[0].predicted_yield_tonnes_per_hectare - 2.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unrecoverable_batch_is_excluded_not_zeroed() {
        let store = MemoryStore::new();
        store.insert_field(1, 1, Decimal::from(10), None).await.unwrap();
        store.insert_crop_cycle(101, 1, "Maize", date(2024, 3, 1)).await.unwrap();
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let summary = BatchPredictor::new(&store, &bundle)
            .run(run_time())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.excluded, 1);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.exit_code(), 2);
        assert_eq!(store.prediction_count().await, 0);
    }

    #[tokio::test]
    async fn test_no_active_cycles_is_a_clean_no_op() {
        let store = MemoryStore::new();
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let summary = BatchPredictor::new(&store, &bundle)
            .run(run_time())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_harvested_cycles_are_not_predicted() {
        let store = scenario_store().await;
        store
            .record_harvest(101, date(2024, 5, 20), Some(Decimal::from(30)))
            .await
            .unwrap();
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let summary = BatchPredictor::new(&store, &bundle)
            .run(run_time())
            .await
            .unwrap();
        assert_eq!(summary.attempted, 0);
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_other_cycles() {
        let memory = scenario_store().await;
        memory.insert_field(2, 1, Decimal::from(6), None).await.unwrap();
        memory.insert_crop_cycle(102, 2, "Maize", date(2024, 4, 1)).await.unwrap();
        memory
            .record_reading(reading("sensor_field_2", at(2024, 4, 10, 12), 18.0))
            .await
            .unwrap();

        let mut store = FlakyStore::new(memory);
        store.fail_upsert_for = Some(101);
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let summary = BatchPredictor::new(&store, &bundle)
            .run(run_time())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(!summary.is_clean());
        assert!(store.predictions_for_cycle(101).await.unwrap().is_empty());
        assert_eq!(store.predictions_for_cycle(102).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_run() {
        let mut store = FlakyStore::new(scenario_store().await);
        store.fail_reads = true;
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let result = BatchPredictor::new(&store, &bundle).run(run_time()).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_lost_connection_during_writes_aborts_run() {
        let memory = MemoryStore::new();
        for id in 1..=5 {
            memory.insert_field(id, 1, Decimal::from(4), None).await.unwrap();
            memory
                .insert_crop_cycle(100 + id, id, "Maize", date(2024, 3, 1))
                .await
                .unwrap();
            memory
                .record_reading(reading(&format!("sensor_field_{}", id), at(2024, 4, 2, 12), 22.0))
                .await
                .unwrap();
        }

        let mut store = FlakyStore::new(memory);
        store.storage_down = true;
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));

        let result = BatchPredictor::new(&store, &bundle).run(run_time()).await;

        assert!(matches!(
            result,
            Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut))
        ));
        // The first timeout stops the run; later cycles are not attempted
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.prediction_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_runs_converge_to_one_row() {
        let store = scenario_store().await;
        let (_dir, bundle) = load_bundle(temperature_bundle("v1"));
        let first = BatchPredictor::new(&store, &bundle);
        let second = BatchPredictor::new(&store, &bundle);
        let later = run_time() + Duration::minutes(5);

        let (a, b) = tokio::join!(first.run(run_time()), second.run(later));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(store.prediction_count().await, 1);
        assert_eq!(a.inserted + a.updated + b.inserted + b.updated, 2);
        assert_eq!(a.inserted + b.inserted, 1);
        assert!(a.is_clean() && b.is_clean());
    }

    #[tokio::test]
    async fn test_forest_bundle_round_trips_through_artifacts() {
        let store = scenario_store().await;
        let stump = |threshold: f64, left: f64, right: f64| RegressionTree {
            children_left: vec![1, -1, -1],
            children_right: vec![2, -1, -1],
            feature: vec![0, -2, -2],
            threshold: vec![threshold, -2.0, -2.0],
            value: vec![0.0, left, right],
        };
        let bundle = ModelBundle::new(
            "v3",
            StandardScaler {
                mean: vec![0.0; 4],
                scale: vec![1.0; 4],
            },
            Regressor::RandomForest {
                trees: vec![stump(25.0, 3.0, 5.0), stump(20.0, 1.0, 4.0)],
            },
            vocabulary(&[AVG_TEMP, MIN_TEMP, MAX_TEMP, FIELD_AREA_HECTARES]),
        )
        .unwrap();
        let (_dir, bundle) = load_bundle(bundle);

        BatchPredictor::new(&store, &bundle)
            .run(run_time())
            .await
            .unwrap();

        // avg_temp 24: first tree goes left (3.0), second right (4.0)
        let stored = store.predictions_for_cycle(101).await.unwrap();
        assert!((stored[0].predicted_yield_tonnes_per_hectare - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_bundle_is_fatal() {
        let dir = tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        artifacts.save(&temperature_bundle("v1")).unwrap();

        assert!(matches!(
            artifacts.load("v2"),
            Err(AppError::ArtifactMissing { .. })
        ));
        assert_eq!(artifacts.latest_version().unwrap().as_str(), "v1");
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Rows with distinct ids and an arbitrary subset of columns, some of
    /// them outside any vocabulary
    fn rows_strategy() -> impl Strategy<Value = Vec<FeatureRow>> {
        let column = prop_oneof![
            Just(AVG_TEMP),
            Just(MIN_TEMP),
            Just(MAX_TEMP),
            Just(GDD_APPROX),
            Just(FIELD_AREA_HECTARES),
            Just("soil_ph"),
        ];
        let cell = (column, proptest::option::of(-50.0f64..50.0));
        prop::collection::vec(prop::collection::vec(cell, 0..6), 0..20).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, cells)| {
                    cells.into_iter().fold(FeatureRow::new(1000 - i as i64), |row, (name, value)| {
                        row.with(name, value)
                    })
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Alignment keeps row count and order and yields exactly the
        /// vocabulary's columns
        #[test]
        fn prop_alignment_preserves_rows_and_order(rows in rows_strategy()) {
            let vocab = FeatureVocabulary::canonical();
            let aligned = AlignedMatrix::align(&rows, &vocab);

            let ids: Vec<i64> = rows.iter().map(|r| r.crop_cycle_id).collect();
            prop_assert_eq!(&aligned.crop_cycle_ids, &ids);
            prop_assert_eq!(aligned.rows.len(), rows.len());
            prop_assert_eq!(aligned.columns.as_slice(), vocab.names());

            for (row, aligned_row) in rows.iter().zip(&aligned.rows) {
                prop_assert_eq!(aligned_row.len(), vocab.len());
                for (name, value) in vocab.names().iter().zip(aligned_row) {
                    prop_assert_eq!(*value, row.get(name).flatten());
                }
            }
        }

        /// Imputation either fills every cell or names the empty columns
        #[test]
        fn prop_imputation_fills_or_reports(rows in rows_strategy()) {
            let aligned = AlignedMatrix::align(&rows, &FeatureVocabulary::canonical());
            match aligned.impute() {
                Ok(matrix) => {
                    prop_assert_eq!(matrix.len(), rows.len());
                    prop_assert!(matrix.iter().flatten().all(|v| v.is_finite()));
                }
                Err(AppError::FeatureUnrecoverable { columns, crop_cycle_ids }) => {
                    prop_assert!(!columns.is_empty());
                    prop_assert_eq!(crop_cycle_ids.len(), rows.len());
                    let unique: HashSet<&String> = columns.iter().collect();
                    prop_assert_eq!(unique.len(), columns.len());
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
