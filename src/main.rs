use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use patchcast::service::{bootstrap_artifacts, recalibrate_detector};
use patchcast::{ArchiveFileSource, ForecastRequest, ForecastService, ServiceConfig, ServiceContext};

#[derive(Parser, Debug)]
#[command(name = "patchcast")]
#[command(about = "Patch-transformer weather forecasts with reconstruction anomaly scoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forecast the next hours from archived history
    Forecast {
        #[arg(long)]
        config: PathBuf,
        /// Archive response JSON holding the hourly history
        #[arg(long)]
        archive: PathBuf,
        #[arg(long, default_value = "28.6139", allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, default_value = "77.2090", allow_hyphen_values = true)]
        lon: f64,
        /// First day of history (YYYY-MM-DD); defaults to ten days ago
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day of history, inclusive; defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Print an example forecast request
    Example,
    /// Print the loaded model configuration
    Info {
        #[arg(long)]
        config: PathBuf,
    },
    /// Check that both artifacts load
    Health {
        #[arg(long)]
        config: PathBuf,
    },
    /// Report hold-out forecast error per feature over an archive
    Evaluate {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        archive: PathBuf,
        /// Share of the windows skipped before the hold-out part
        #[arg(long, default_value = "0.8")]
        train_ratio: f64,
    },
    /// Refit the detector threshold over an archive
    Calibrate {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        archive: PathBuf,
        /// Standard deviations above the mean score; defaults to the config value
        #[arg(long)]
        k: Option<f64>,
    },
    /// Write untrained artifacts with scalers fitted on an archive
    Init {
        #[arg(long)]
        forecaster: PathBuf,
        #[arg(long)]
        detector: PathBuf,
        #[arg(long)]
        archive: PathBuf,
        #[arg(long, default_value = "2.0")]
        k: f64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_context(path: &Path) -> Result<Arc<ServiceContext>> {
    let config = ServiceConfig::load(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let context = ServiceContext::load(&config).context("failed to load model artifacts")?;
    Ok(Arc::new(context))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Forecast { config, archive, lat, lon, start, end } => {
            let context = load_context(&config)?;
            let service = ForecastService::new(context, Arc::new(ArchiveFileSource::new(archive)))?;
            let example = ForecastRequest::example();
            let request = ForecastRequest {
                latitude: lat,
                longitude: lon,
                start_date: start.unwrap_or(example.start_date),
                end_date: end.unwrap_or(example.end_date),
            };

            match service.handle(&request) {
                Ok(result) => print_json(&result)?,
                Err(failure) => {
                    print_json(&failure)?;
                    std::process::exit(2);
                }
            }
        }
        Command::Example => print_json(&ForecastRequest::example())?,
        Command::Info { config } => {
            let context = load_context(&config)?;
            print_json(&context.model_info())?;
        }
        Command::Health { config } => {
            let context = load_context(&config)?;
            print_json(&context.health())?;
        }
        Command::Evaluate { config, archive, train_ratio } => {
            let context = load_context(&config)?;
            let table = ArchiveFileSource::new(&archive).read()?.to_table(None, None)?;
            let report = context.evaluate(table.matrix(), train_ratio)?;

            let per_feature: std::collections::BTreeMap<&str, f64> = context
                .registry()
                .feature_order()
                .iter()
                .map(String::as_str)
                .zip(report.feature_mae.iter().copied())
                .collect();
            print_json(&serde_json::json!({
                "windows": report.windows,
                "mse": report.mse,
                "feature_mae": per_feature,
            }))?;
        }
        Command::Calibrate { config: config_path, archive, k } => {
            let config = ServiceConfig::load(&config_path)
                .with_context(|| format!("failed to read config {}", config_path.display()))?;
            let table = ArchiveFileSource::new(&archive).read()?.to_table(None, None)?;
            let k = k.unwrap_or(config.calibration_k);
            let threshold = recalibrate_detector(&config, table.matrix(), k)?;
            info!(threshold, "calibration complete");
            println!("{threshold}");
        }
        Command::Init { forecaster, detector, archive, k } => {
            let table = ArchiveFileSource::new(&archive).read()?.to_table(None, None)?;
            bootstrap_artifacts(&forecaster, &detector, table.matrix(), k)?;
        }
    }

    Ok(())
}
