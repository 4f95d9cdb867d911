//! Request handling on top of an immutable, shared model context.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::anomaly::{AnomalyDetector, AnomalyReport, ServingThreshold};
use crate::config::{AnomalyInput, ServiceConfig};
use crate::error::{ForecastError, Result};
use crate::features::{derive_features, target_feature_names};
use crate::models::autoencoder::{AutoencoderConfig, SequenceAutoencoder};
use crate::models::patch_forecaster::{EvaluationReport, ForecasterConfig, PatchForecaster};
use crate::persistence::{DetectorArtifact, ForecasterArtifact, ModelMetadata, PersistentArtifact};
use crate::scaler::ScalerRegistry;
use crate::source::{HistoricalQuery, HistoricalSource};
use crate::table::{FeatureMatrix, ObservationTable};
use crate::windowing::{split_train_validation, trailing_window, training_pairs};

/// Loaded models, scalers and settings. Built once, then only read.
#[derive(Debug)]
pub struct ServiceContext {
    config: ServiceConfig,
    forecaster: PatchForecaster,
    registry: ScalerRegistry,
    detector: AnomalyDetector,
    threshold: ServingThreshold,
    forecaster_metadata: Option<ModelMetadata>,
    detector_metadata: Option<ModelMetadata>,
}

impl ServiceContext {
    /// Load both artifacts. Any failure here is fatal for the process.
    pub fn load(config: &ServiceConfig) -> Result<Self> {
        let policy = config.missing_scaler_policy;

        let (forecaster, registry, forecaster_metadata) = ForecasterArtifact::load(&config.forecaster_path)
            .and_then(|artifact| artifact.into_model(policy))
            .map_err(|e| {
                error!(path = %config.forecaster_path.display(), error = %e, "forecaster artifact unusable");
                e
            })?;
        let (detector, detector_metadata) = DetectorArtifact::load(&config.detector_path)
            .and_then(|artifact| artifact.into_detector(policy))
            .map_err(|e| {
                error!(path = %config.detector_path.display(), error = %e, "detector artifact unusable");
                e
            })?;

        let mut context = Self::from_parts(config.clone(), forecaster, registry, detector);
        info!(
            features = context.registry.num_features(),
            parameters = context.forecaster.num_parameters(),
            threshold = context.threshold.effective(),
            "service context ready"
        );
        context.forecaster_metadata = Some(forecaster_metadata);
        context.detector_metadata = Some(detector_metadata);
        Ok(context)
    }

    pub fn from_parts(
        config: ServiceConfig,
        forecaster: PatchForecaster,
        registry: ScalerRegistry,
        detector: AnomalyDetector,
    ) -> Self {
        let threshold = ServingThreshold::new(detector.threshold, config.threshold_bias);
        Self {
            config,
            forecaster,
            registry,
            detector,
            threshold,
            forecaster_metadata: None,
            detector_metadata: None,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn forecaster(&self) -> &PatchForecaster {
        &self.forecaster
    }

    pub fn registry(&self) -> &ScalerRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    pub fn threshold(&self) -> ServingThreshold {
        self.threshold
    }

    /// Forecast the next `pred_len` hours and assess anomalies.
    pub fn infer(&self, table: &ObservationTable, query: &HistoricalQuery) -> Result<InferenceResult> {
        let seq_len = self.forecaster.config.seq_len;
        if table.len() < seq_len {
            return Err(ForecastError::InsufficientHistory { required: seq_len, available: table.len() });
        }

        let mut matrix = table.matrix().clone();
        derive_features(&mut matrix)?;

        let missing = matrix.missing(self.registry.feature_order());
        if !missing.is_empty() {
            return Err(ForecastError::MissingFeatures(missing.into_iter().map(String::from).collect()));
        }

        let normalized = self.registry.normalize(&matrix)?;
        let window = trailing_window(&normalized, seq_len)?;
        let prediction = self.forecaster.forward(&window)?;
        let forecast = self.registry.denormalize(&prediction)?;
        debug!(rows = table.len(), horizon = forecast.nrows(), "forecast computed");

        let anomaly = self.assess_anomalies(&matrix, &forecast);

        let last = table.timestamps().last().copied().ok_or_else(|| {
            ForecastError::UpstreamData("observation table is empty".to_string())
        })?;
        let forecast_times = (1..=forecast.nrows() as i64)
            .map(|h| (last + Duration::hours(h)).format("%Y-%m-%dT%H:%M").to_string())
            .collect();

        let series = forecast
            .names()
            .iter()
            .filter_map(|name| forecast.column(name).map(|values| (name.clone(), values)))
            .collect();

        Ok(InferenceResult {
            forecast: series,
            forecast_times,
            anomaly,
            metadata: InferenceMetadata {
                latitude: query.latitude,
                longitude: query.longitude,
                start_date: query.start_date,
                end_date: query.end_date,
                features: self.registry.feature_order().to_vec(),
                forecast_horizon: self.forecaster.config.pred_len,
                history_hours: table.len(),
                anomaly_input: self.config.anomaly_input,
                generated_at: Utc::now().to_rfc3339(),
            },
        })
    }

    /// Best effort: any failure turns into a degraded report.
    fn assess_anomalies(&self, history: &FeatureMatrix, forecast: &FeatureMatrix) -> AnomalyReport {
        let threshold = self.threshold.effective();
        let input = match self.config.anomaly_input {
            AnomalyInput::Historical => history.tail(self.forecaster.config.seq_len),
            AnomalyInput::Forecast => forecast.clone(),
        };

        match self.detector.detect_with_threshold(&input, threshold) {
            Ok(detection) => AnomalyReport::summarize(&detection, self.config.recent_error_count),
            Err(err) => AnomalyReport::degraded(&err, threshold),
        }
    }

    /// Accuracy over the chronologically last `1 - train_ratio` of the
    /// `(input, target)` pairs in `data`, in real units.
    pub fn evaluate(&self, data: &FeatureMatrix, train_ratio: f64) -> Result<EvaluationReport> {
        let mut data = data.clone();
        derive_features(&mut data)?;

        let config = &self.forecaster.config;
        let normalized = self.registry.normalize(&data)?;
        let pairs = training_pairs(&normalized, config.seq_len, config.pred_len)?;
        let (_, validation) = split_train_validation(pairs, train_ratio);
        if validation.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                required: config.seq_len + config.pred_len + 1,
                available: data.nrows(),
            });
        }

        let report = self.forecaster.evaluate_denormalized(&validation, &self.registry)?;
        info!(windows = report.windows, mse = report.mse, "evaluated forecaster");
        Ok(report)
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            forecaster_loaded: true,
            detector_loaded: true,
            forecaster_version: self.forecaster_metadata.as_ref().map(|m| m.version.clone()),
            detector_version: self.detector_metadata.as_ref().map(|m| m.version.clone()),
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        let forecaster = &self.forecaster.config;
        ModelInfo {
            features: self.registry.feature_order().to_vec(),
            seq_len: forecaster.seq_len,
            forecast_horizon: forecaster.pred_len,
            patch_len: forecaster.patch_len,
            stride: forecaster.stride,
            num_patches: forecaster.num_patches(),
            forecaster_parameters: self.forecaster.num_parameters(),
            detector_features: self.detector.feature_names().to_vec(),
            detector_time_steps: self.detector.time_steps(),
            learned_threshold: self.threshold.learned,
            threshold_bias: self.threshold.bias,
            anomaly_threshold: self.threshold.effective(),
            anomaly_input: self.config.anomaly_input,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceMetadata {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub features: Vec<String>,
    pub forecast_horizon: usize,
    pub history_hours: usize,
    pub anomaly_input: AnomalyInput,
    pub generated_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Feature name to one value per forecast hour.
    pub forecast: BTreeMap<String, Vec<f64>>,
    pub forecast_times: Vec<String>,
    pub anomaly: AnomalyReport,
    pub metadata: InferenceMetadata,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub forecaster_loaded: bool,
    pub detector_loaded: bool,
    pub forecaster_version: Option<String>,
    pub detector_version: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub features: Vec<String>,
    pub seq_len: usize,
    pub forecast_horizon: usize,
    pub patch_len: usize,
    pub stride: usize,
    pub num_patches: usize,
    pub forecaster_parameters: usize,
    pub detector_features: Vec<String>,
    pub detector_time_steps: usize,
    pub learned_threshold: f64,
    pub threshold_bias: f64,
    pub anomaly_threshold: f64,
    pub anomaly_input: AnomalyInput,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ForecastRequest {
    /// The last ten days at New Delhi.
    pub fn example() -> Self {
        let end_date = Utc::now().date_naive();
        Self {
            latitude: 28.6139,
            longitude: 77.2090,
            start_date: end_date - Duration::days(10),
            end_date,
        }
    }

    pub fn validate(&self) -> Result<HistoricalQuery> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ForecastError::InvalidRequest(format!("latitude {} outside [-90, 90]", self.latitude)));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ForecastError::InvalidRequest(format!("longitude {} outside [-180, 180]", self.longitude)));
        }
        if self.start_date > self.end_date {
            return Err(ForecastError::InvalidRequest(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }
        Ok(HistoricalQuery {
            latitude: self.latitude,
            longitude: self.longitude,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }
}

/// Structured per-request failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestFailure {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<usize>,
}

impl From<&ForecastError> for RequestFailure {
    fn from(err: &ForecastError) -> Self {
        let mut failure = RequestFailure {
            kind: err.kind().to_string(),
            message: err.to_string(),
            missing: Vec::new(),
            required: None,
            available: None,
        };
        match err {
            ForecastError::InsufficientHistory { required, available } => {
                failure.required = Some(*required);
                failure.available = Some(*available);
            }
            ForecastError::MissingFeatures(names) => failure.missing = names.clone(),
            ForecastError::UnknownFeature(name) => failure.missing = vec![name.clone()],
            _ => {}
        }
        failure
    }
}

pub type Response = std::result::Result<InferenceResult, RequestFailure>;

/// Fetches history and runs inference on a dedicated worker pool.
pub struct ForecastService {
    context: Arc<ServiceContext>,
    source: Arc<dyn HistoricalSource>,
    pool: ThreadPool,
}

impl ForecastService {
    pub fn new(context: Arc<ServiceContext>, source: Arc<dyn HistoricalSource>) -> std::result::Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(context.config.worker_threads)
            .thread_name(|i| format!("patchcast-worker-{i}"))
            .build()?;
        info!(threads = pool.current_num_threads(), "inference pool started");
        Ok(Self { context, source, pool })
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    pub fn handle(&self, request: &ForecastRequest) -> Response {
        self.pool.install(|| self.process(request))
    }

    /// Results line up with `requests`; completion order is unspecified.
    pub fn handle_batch(&self, requests: &[ForecastRequest]) -> Vec<Response> {
        self.pool
            .install(|| requests.par_iter().map(|request| self.process(request)).collect())
    }

    pub fn health(&self) -> HealthStatus {
        self.context.health()
    }

    pub fn model_info(&self) -> ModelInfo {
        self.context.model_info()
    }

    fn process(&self, request: &ForecastRequest) -> Response {
        let result = request
            .validate()
            .and_then(|query| {
                let table = self.source.fetch(&query)?;
                self.context.infer(&table, &query)
            });

        result.map_err(|err| {
            info!(kind = err.kind(), error = %err, "request failed");
            RequestFailure::from(&err)
        })
    }
}

/// Fit a fresh threshold for the detector at `path` and write it back.
pub fn recalibrate_detector(config: &ServiceConfig, data: &FeatureMatrix, k: f64) -> Result<f64> {
    let path = &config.detector_path;
    let (mut detector, metadata) = DetectorArtifact::load(path)?.into_detector(config.missing_scaler_policy)?;

    let mut data = data.clone();
    derive_features(&mut data)?;
    let threshold = detector.calibrate(&data, k)?;

    DetectorArtifact::from_detector(&detector, metadata).save(path)?;
    info!(threshold, k, path = %path.display(), "detector recalibrated");
    Ok(threshold)
}

/// Write untrained artifacts whose scalers are fitted on `data`.
///
/// The detector threshold is calibrated over the same data with `k`.
pub fn bootstrap_artifacts(
    forecaster_path: &Path,
    detector_path: &Path,
    data: &FeatureMatrix,
    k: f64,
) -> Result<()> {
    let names = target_feature_names();
    let mut data = data.clone();
    derive_features(&mut data)?;

    let forecaster_config = ForecasterConfig { num_features: names.len(), ..ForecasterConfig::default() };
    let forecaster = PatchForecaster::try_new(forecaster_config)?;
    let registry = ScalerRegistry::fit(&data, &names)?;
    let metadata = ModelMetadata::new("patch_forecaster", Some("untrained bootstrap".to_string()));
    ForecasterArtifact::from_model(&forecaster, &registry, metadata).save(forecaster_path)?;

    let detector_config = AutoencoderConfig { features: names.len(), ..AutoencoderConfig::default() };
    let mut detector = AnomalyDetector::new(
        SequenceAutoencoder::new(detector_config),
        ScalerRegistry::fit(&data, &names)?,
        0.0,
    );
    detector.calibrate(&data, k)?;
    let metadata = ModelMetadata::new("lstm_autoencoder", Some("untrained bootstrap".to_string()));
    DetectorArtifact::from_detector(&detector, metadata).save(detector_path)?;

    info!(
        forecaster = %forecaster_path.display(),
        detector = %detector_path.display(),
        threshold = detector.threshold,
        "wrote bootstrap artifacts"
    );
    Ok(())
}
