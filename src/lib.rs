//! # patchcast
//!
//! Short-horizon weather forecasting with a patch-embedding transformer, paired
//! with an LSTM autoencoder that flags anomalous conditions by reconstruction
//! error.
//!
//! ## Core Components
//!
//! - **Layers**: linear, dropout, LSTM cell, layer norm, multi-head self-attention
//!   and post-norm transformer encoder blocks, all running on `ndarray`
//! - **Models**: [`PatchForecaster`] and the [`SequenceAutoencoder`] behind
//!   [`AnomalyDetector`]
//! - **Data**: named-column tables, derived features, per-feature scalers and
//!   windowing
//! - **Persistence**: JSON or binary artifacts carrying weights, scalers and the
//!   ordered feature list
//! - **Service**: an immutable [`ServiceContext`] shared by every request
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::Array2;
//! use patchcast::{ForecasterConfig, PatchForecaster};
//!
//! let model = PatchForecaster::new(ForecasterConfig::default());
//! let window = Array2::zeros((128, 12));
//! let forecast = model.forward(&window).unwrap();
//! assert_eq!(forecast.dim(), (24, 12));
//! ```

pub mod utils;
pub mod layers;
pub mod models;
pub mod loss;
pub mod error;
pub mod table;
pub mod features;
pub mod scaler;
pub mod windowing;
pub mod anomaly;
pub mod persistence;
pub mod config;
pub mod source;
pub mod service;

// Re-export commonly used items
pub use error::{ForecastError, Result};
pub use models::patch_forecaster::{ForecasterConfig, PatchForecaster};
pub use models::autoencoder::{AutoencoderConfig, SequenceAutoencoder};
pub use models::lstm_network::LSTMNetwork;
pub use layers::lstm_cell::LSTMCell;
pub use loss::{MSELoss, MAELoss};
pub use table::{FeatureMatrix, ObservationTable};
pub use scaler::{FeatureScaler, MissingScalerPolicy, ScalerRegistry};
pub use anomaly::{AnomalyDetector, AnomalyReport, AnomalyStatus, ServingThreshold, DEFAULT_THRESHOLD_BIAS};
pub use persistence::{ArtifactError, DetectorArtifact, ForecasterArtifact, ModelMetadata, ModelPersistence, PersistentArtifact};
pub use config::{AnomalyInput, ServiceConfig};
pub use source::{ArchiveFileSource, ArchiveResponse, HistoricalQuery, HistoricalSource, StaticSource};
pub use service::{ForecastRequest, ForecastService, InferenceResult, RequestFailure, ServiceContext};

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_library_integration() {
        let names = features::target_feature_names();
        let config = ForecasterConfig { seq_len: 32, pred_len: 4, d_model: 16, n_layers: 1, ..ForecasterConfig::default() };
        let model = PatchForecaster::new(config);
        let registry = ScalerRegistry::identity(&names);

        let history = FeatureMatrix::new(names.clone(), Array2::from_elem((40, 12), 1.5)).unwrap();
        let window = windowing::trailing_window(&registry.normalize(&history).unwrap(), 32).unwrap();
        let forecast = registry.denormalize(&model.forward(&window).unwrap()).unwrap();

        assert_eq!(forecast.values().dim(), (4, 12));
        assert_eq!(forecast.names(), &names[..]);
    }
}
