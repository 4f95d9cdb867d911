use thiserror::Error;

use crate::persistence::ArtifactError;

/// Failures surfaced by the forecasting core.
///
/// `ArtifactLoad` is only produced while building a service context and is
/// fatal for the process. Everything else is per request.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("need at least {required} hours of data, got only {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("missing required features: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),

    #[error("no scaler registered for feature '{0}'")]
    UnknownFeature(String),

    #[error("historical data source failed: {0}")]
    UpstreamData(String),

    #[error("failed to load model artifact: {0}")]
    ArtifactLoad(#[from] ArtifactError),

    #[error("{context}: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
}

impl ForecastError {
    /// Stable identifier used in structured failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::InsufficientHistory { .. } => "insufficient_history",
            ForecastError::MissingFeatures(_) => "missing_features",
            ForecastError::UnknownFeature(_) => "unknown_feature",
            ForecastError::UpstreamData(_) => "upstream_data_error",
            ForecastError::ArtifactLoad(_) => "artifact_load_error",
            ForecastError::ShapeMismatch { .. } => "shape_mismatch",
            ForecastError::InvalidRequest(_) => "invalid_request",
            ForecastError::InvalidConfig(_) => "invalid_config",
        }
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
