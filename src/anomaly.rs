//! Reconstruction-error anomaly detection.
//!
//! A window is anomalous when the autoencoder reconstructs it worse than a
//! threshold fitted on calibration data.

use ndarray::Array2;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::loss::{LossFunction, MSELoss};
use crate::models::autoencoder::SequenceAutoencoder;
use crate::scaler::ScalerRegistry;
use crate::table::FeatureMatrix;
use crate::utils::mean_std;
use crate::windowing::{sliding_windows, subsample_windows};

/// Deployment offset subtracted from the learned threshold at serving time.
pub const DEFAULT_THRESHOLD_BIAS: f64 = 0.3;

/// Standard deviations above the mean calibration score.
pub const DEFAULT_CALIBRATION_K: f64 = 2.0;

/// Learned threshold plus the serving-time override.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServingThreshold {
    pub learned: f64,
    pub bias: f64,
}

impl ServingThreshold {
    pub fn new(learned: f64, bias: f64) -> Self {
        Self { learned, bias }
    }

    pub fn effective(&self) -> f64 {
        self.learned - self.bias
    }
}

/// `mean + k * stddev` of a score series (population stddev).
pub fn calibrate_threshold(scores: &[f64], k: f64) -> f64 {
    let (mean, std) = mean_std(scores);
    mean + k * std
}

/// Per-window scores and flags for one run of the detector.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub flags: Vec<bool>,
    pub scores: Vec<f64>,
    pub threshold: f64,
}

impl Detection {
    pub fn from_scores(scores: Vec<f64>, threshold: f64) -> Self {
        let flags = scores.iter().map(|&s| s > threshold).collect();
        Self { flags, scores, threshold }
    }

    pub fn anomaly_indices(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(i, &flagged)| flagged.then_some(i))
            .collect()
    }

    pub fn total_anomalies(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }
}

#[derive(Clone, Debug)]
pub struct AnomalyDetector {
    pub autoencoder: SequenceAutoencoder,
    /// Scalers owned by the detector; never shared with the forecaster.
    pub registry: ScalerRegistry,
    pub threshold: f64,
}

impl AnomalyDetector {
    pub fn new(autoencoder: SequenceAutoencoder, registry: ScalerRegistry, threshold: f64) -> Self {
        Self { autoencoder, registry, threshold }
    }

    pub fn time_steps(&self) -> usize {
        self.autoencoder.config.time_steps
    }

    pub fn feature_names(&self) -> &[String] {
        self.registry.feature_order()
    }

    /// Normalize with the detector's scalers and cut every stride-1 window.
    pub fn prepare(&self, data: &FeatureMatrix) -> Result<Vec<Array2<f64>>> {
        let normalized = self.registry.normalize(data)?;
        sliding_windows(&normalized, self.time_steps())
    }

    /// Like [`prepare`](Self::prepare), keeping at most `max_samples` windows.
    pub fn prepare_training<R: Rng + ?Sized>(
        &self,
        data: &FeatureMatrix,
        max_samples: usize,
        rng: &mut R,
    ) -> Result<Vec<Array2<f64>>> {
        let windows = self.prepare(data)?;
        Ok(subsample_windows(windows, max_samples, rng))
    }

    pub fn reconstruct(&self, sequences: &[Array2<f64>]) -> Result<Vec<Array2<f64>>> {
        sequences
            .par_iter()
            .map(|s| self.autoencoder.reconstruct(s))
            .collect()
    }

    /// Mean squared reconstruction error of each sequence.
    pub fn score(&self, sequences: &[Array2<f64>]) -> Result<Vec<f64>> {
        sequences
            .par_iter()
            .map(|s| {
                let reconstruction = self.autoencoder.reconstruct(s)?;
                Ok(MSELoss.compute_loss(&reconstruction, s))
            })
            .collect()
    }

    pub fn detect(&self, data: &FeatureMatrix) -> Result<Detection> {
        self.detect_with_threshold(data, self.threshold)
    }

    pub fn detect_with_threshold(&self, data: &FeatureMatrix, threshold: f64) -> Result<Detection> {
        let sequences = self.prepare(data)?;
        let scores = self.score(&sequences)?;
        debug!(windows = scores.len(), threshold, "scored reconstruction errors");
        Ok(Detection::from_scores(scores, threshold))
    }

    /// Fit and store the threshold over a calibration corpus.
    pub fn calibrate(&mut self, data: &FeatureMatrix, k: f64) -> Result<f64> {
        let scores = self.score(&self.prepare(data)?)?;
        self.threshold = calibrate_threshold(&scores, k);
        debug!(windows = scores.len(), k, threshold = self.threshold, "calibrated threshold");
        Ok(self.threshold)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyStatus {
    Evaluated,
    /// Detection could not run; the flag and error fields are defaults.
    Degraded,
}

/// Anomaly summary returned alongside a forecast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub has_anomaly: bool,
    pub latest_reconstruction_error: f64,
    pub anomaly_threshold: f64,
    pub total_anomalies: usize,
    pub anomaly_indices: Vec<usize>,
    pub reconstruction_errors: Vec<f64>,
    pub status: AnomalyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnomalyReport {
    /// Summarize a detection, keeping the last `recent` scores.
    pub fn summarize(detection: &Detection, recent: usize) -> Self {
        let latest = detection.scores.last().copied().unwrap_or(0.0);
        let skip = detection.scores.len().saturating_sub(recent);

        Self {
            has_anomaly: detection.flags.last().copied().unwrap_or(false),
            latest_reconstruction_error: latest,
            anomaly_threshold: detection.threshold,
            total_anomalies: detection.total_anomalies(),
            anomaly_indices: detection.anomaly_indices(),
            reconstruction_errors: detection.scores[skip..].to_vec(),
            status: AnomalyStatus::Evaluated,
            error: None,
        }
    }

    pub fn degraded(err: &ForecastError, threshold: f64) -> Self {
        warn!(kind = err.kind(), error = %err, "anomaly detection degraded");
        Self {
            has_anomaly: false,
            latest_reconstruction_error: 0.0,
            anomaly_threshold: threshold,
            total_anomalies: 0,
            anomaly_indices: Vec::new(),
            reconstruction_errors: Vec::new(),
            status: AnomalyStatus::Degraded,
            error: Some(err.to_string()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == AnomalyStatus::Degraded
    }
}
