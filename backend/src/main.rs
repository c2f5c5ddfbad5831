//! Field Yield Platform - batch job runner
//!
//! Runs the yield prediction batch on an external schedule and hosts the
//! operator commands around it: training-set export, device registration,
//! sensor backfill and prediction lookup.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use yield_batch::ml::ArtifactStore;
use yield_batch::models::NewSensorReading;
use yield_batch::services::{write_training_csv, BatchPredictor, FeatureService};
use yield_batch::storage::{PgStore, PipelineStore};
use yield_batch::{AppError, Config};

#[derive(Debug, Parser)]
#[command(name = "yield-batch", version, about = "Crop yield feature and prediction jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Predict yields for every active crop cycle
    Run {
        /// Model bundle to use; defaults to the configured or newest version
        #[arg(long)]
        model_version: Option<String>,
    },

    /// Write the training set for completed cycles as CSV
    ExportTrainingSet {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Attribute a sensor device to a field
    RegisterDevice { device_id: String, field_id: i64 },

    /// Load sensor readings from a JSON-lines file
    ImportReadings {
        #[arg(long)]
        file: PathBuf,
    },

    /// Show stored predictions for a crop cycle
    Predictions { crop_cycle_id: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load();
    init_tracing(config.as_ref().map(Config::is_production).unwrap_or(false));

    let outcome = match config {
        Ok(config) => execute(cli.command, &config).await,
        Err(err) => Err(anyhow::Error::new(AppError::from(err)).context("Failed to load configuration")),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %format!("{:#}", err), "yield-batch failed");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(production: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "yield_batch=info,sqlx=warn".into());

    let (json, pretty) = if production {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

/// Open the pool, run the command, and close the pool whatever happened
async fn execute(command: Command, config: &Config) -> anyhow::Result<u8> {
    info!("Environment: {}", config.environment);
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    let result = dispatch(command, config, &pool).await;
    pool.close().await;
    result
}

async fn dispatch(command: Command, config: &Config, pool: &PgPool) -> anyhow::Result<u8> {
    // Run migrations in development
    if config.environment == "development" {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(AppError::from)?;
    }

    let store = PgStore::new(pool.clone());
    match command {
        Command::Run { model_version } => run_batch(&store, config, model_version).await,
        Command::ExportTrainingSet { output } => export_training_set(&store, output).await,
        Command::RegisterDevice {
            device_id,
            field_id,
        } => {
            let device = store.sensors().register_device(&device_id, field_id).await?;
            info!(
                device_id = %device.device_id,
                field_id = device.field_id,
                "Device registered"
            );
            Ok(0)
        }
        Command::ImportReadings { file } => import_readings(&store, &file).await,
        Command::Predictions { crop_cycle_id } => show_predictions(&store, crop_cycle_id).await,
    }
}

async fn run_batch(
    store: &PgStore,
    config: &Config,
    requested: Option<String>,
) -> anyhow::Result<u8> {
    let artifacts = ArtifactStore::new(&config.artifacts.dir);
    let version = match requested.or_else(|| config.artifacts.model_version.clone()) {
        Some(version) => version,
        None => artifacts.latest_version()?.to_string(),
    };

    let run_id = Uuid::new_v4();
    let span = info_span!("batch_run", %run_id, model_version = %version);

    async move {
        // Captured once; readings arriving during the run are not considered
        let now = Utc::now();
        let bundle = artifacts.load(&version)?;
        info!(features = bundle.vocabulary.len(), "Model bundle loaded");

        let summary = BatchPredictor::new(store, &bundle).run(now).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok::<_, anyhow::Error>(summary.exit_code())
    }
    .instrument(span)
    .await
}

async fn export_training_set(store: &PgStore, output: Option<PathBuf>) -> anyhow::Result<u8> {
    let set = FeatureService::new(store).training_set().await?;

    let written = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_training_csv(&set.rows, file)?
        }
        None => write_training_csv(&set.rows, std::io::stdout().lock())?,
    };

    info!(
        rows = written,
        excluded = set.excluded.len(),
        "Training set exported"
    );
    Ok(0)
}

async fn import_readings(store: &PgStore, path: &Path) -> anyhow::Result<u8> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<NewSensorReading>(&line) {
            Ok(input) => store
                .sensors()
                .record_reading(input)
                .await
                .map_err(anyhow::Error::from),
            Err(err) => Err(err.into()),
        };

        match outcome {
            Ok(_) => accepted += 1,
            Err(err) => {
                warn!(line = index + 1, error = %err, "Rejected sensor reading");
                rejected += 1;
            }
        }
    }

    info!(accepted, rejected, "Sensor readings imported");
    Ok(if rejected == 0 { 0 } else { 2 })
}

async fn show_predictions(store: &PgStore, crop_cycle_id: i64) -> anyhow::Result<u8> {
    let area = store.crop_cycles().field_area(crop_cycle_id).await?;
    let predictions = store.predictions_for_cycle(crop_cycle_id).await?;

    if predictions.is_empty() {
        println!("No predictions stored for crop cycle {}", crop_cycle_id);
    }
    for prediction in &predictions {
        let total = prediction
            .absolute_yield_tonnes(area)
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{:.3} t/ha\t{} t\t{}",
            prediction.model_version,
            prediction.predicted_at.to_rfc3339(),
            prediction.predicted_yield_tonnes_per_hectare,
            total,
            prediction.input_features
        );
    }
    Ok(0)
}
