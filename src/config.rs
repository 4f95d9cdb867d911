//! Service configuration, loaded once at startup from a JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::anomaly::{DEFAULT_CALIBRATION_K, DEFAULT_THRESHOLD_BIAS};
use crate::persistence::{ArtifactError, ModelPersistence};
use crate::scaler::MissingScalerPolicy;

/// Which window the anomaly detector scores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyInput {
    /// The raw trailing history (current-state anomaly).
    #[default]
    Historical,
    /// The denormalized forecast (forecast-plausibility anomaly).
    Forecast,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub forecaster_path: PathBuf,
    pub detector_path: PathBuf,
    /// Subtracted from the detector's learned threshold when serving.
    pub threshold_bias: f64,
    pub anomaly_input: AnomalyInput,
    pub missing_scaler_policy: MissingScalerPolicy,
    /// Trailing reconstruction errors included in each report.
    pub recent_error_count: usize,
    pub calibration_k: f64,
    /// Inference pool size; 0 lets rayon pick.
    pub worker_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            forecaster_path: PathBuf::from("models/forecaster.bin"),
            detector_path: PathBuf::from("models/detector.bin"),
            threshold_bias: DEFAULT_THRESHOLD_BIAS,
            anomaly_input: AnomalyInput::Historical,
            missing_scaler_policy: MissingScalerPolicy::Reject,
            recent_error_count: 24,
            calibration_k: DEFAULT_CALIBRATION_K,
            worker_threads: 0,
        }
    }
}

impl ServiceConfig {
    /// Read a JSON config; absent fields take their defaults.
    ///
    /// Relative artifact paths are resolved against the config file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let mut config: Self = ModelPersistence::load_from_json(path)?;
        if let Some(base) = path.parent() {
            config.forecaster_path = resolve(base, &config.forecaster_path);
            config.detector_path = resolve(base, &config.detector_path);
        }
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ArtifactError> {
        ModelPersistence::save_to_json(self, path)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() { path.to_path_buf() } else { base.join(path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ServiceConfig = serde_json::from_str(r#"{"anomaly_input": "forecast"}"#).unwrap();
        assert_eq!(config.anomaly_input, AnomalyInput::Forecast);
        assert_eq!(config.threshold_bias, 0.3);
        assert_eq!(config.recent_error_count, 24);
        assert_eq!(config.missing_scaler_policy, MissingScalerPolicy::Reject);
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        std::fs::write(&path, r#"{"forecaster_path": "f.json", "missing_scaler_policy": "identity"}"#).unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.forecaster_path, dir.path().join("f.json"));
        assert_eq!(config.missing_scaler_policy, MissingScalerPolicy::Identity);
    }
}
