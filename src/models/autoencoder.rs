use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::layers::linear::LinearLayer;
use crate::layers::lstm_cell::CellActivation;
use crate::models::lstm_network::LSTMNetwork;
use crate::utils::relu;

/// Shape of a [`SequenceAutoencoder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoencoderConfig {
    pub time_steps: usize,
    pub features: usize,
    pub latent_dim: usize,
    /// Encoder LSTM widths; the decoder mirrors them in reverse.
    pub encoder_units: Vec<usize>,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            time_steps: 24,
            features: 12,
            latent_dim: 8,
            encoder_units: vec![32, 16],
        }
    }
}

impl AutoencoderConfig {
    pub fn decoder_units(&self) -> Vec<usize> {
        self.encoder_units.iter().rev().cloned().collect()
    }
}

/// LSTM sequence autoencoder
///
/// Encoder: stacked relu LSTMs, last step only, then a relu dense layer to
/// `latent_dim`. Decoder: the latent vector repeated for every time step,
/// stacked relu LSTMs, and a per-step dense projection back to `features`.
#[derive(Clone, Debug)]
pub struct SequenceAutoencoder {
    pub config: AutoencoderConfig,
    pub encoder: LSTMNetwork,
    pub latent: LinearLayer,
    pub decoder: LSTMNetwork,
    pub output: LinearLayer,
}

impl SequenceAutoencoder {
    pub fn new(config: AutoencoderConfig) -> Self {
        let encoder = LSTMNetwork::new(config.features, &config.encoder_units)
            .with_activation(CellActivation::Relu);
        let latent = LinearLayer::new(encoder.output_size(), config.latent_dim);
        let decoder = LSTMNetwork::new(config.latent_dim, &config.decoder_units())
            .with_activation(CellActivation::Relu);
        let output = LinearLayer::new(decoder.output_size(), config.features);

        Self { config, encoder, latent, decoder, output }
    }

    pub fn from_parts(
        config: AutoencoderConfig,
        encoder: LSTMNetwork,
        latent: LinearLayer,
        decoder: LSTMNetwork,
        output: LinearLayer,
    ) -> Self {
        Self { config, encoder, latent, decoder, output }
    }

    /// Compress a `(time_steps, features)` window into a `(latent_dim, 1)` code.
    pub fn encode(&self, sequence: &Array2<f64>) -> Result<Array2<f64>> {
        let expected = (self.config.time_steps, self.config.features);
        if sequence.dim() != expected {
            return Err(ForecastError::ShapeMismatch {
                context: "autoencoder input",
                expected,
                found: sequence.dim(),
            });
        }

        let last = self.encoder.forward_last(sequence);
        Ok(self.latent.forward(&last).mapv(relu))
    }

    /// Expand a latent code back to a `(time_steps, features)` window.
    pub fn decode(&self, code: &Array2<f64>) -> Array2<f64> {
        let repeated = code
            .column(0)
            .insert_axis(Axis(0))
            .broadcast((self.config.time_steps, self.config.latent_dim))
            .map(|b| b.to_owned())
            .unwrap_or_else(|| Array2::zeros((self.config.time_steps, self.config.latent_dim)));

        let decoded = self.decoder.forward_sequence(&repeated);
        // per-step projection: columns are time steps
        self.output.forward(&decoded.t().to_owned()).t().to_owned()
    }

    pub fn reconstruct(&self, sequence: &Array2<f64>) -> Result<Array2<f64>> {
        let code = self.encode(sequence)?;
        Ok(self.decode(&code))
    }

    pub fn num_parameters(&self) -> usize {
        self.encoder.num_parameters()
            + self.latent.num_parameters()
            + self.decoder.num_parameters()
            + self.output.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AutoencoderConfig {
        AutoencoderConfig { time_steps: 6, features: 3, latent_dim: 2, encoder_units: vec![5, 4] }
    }

    #[test]
    fn test_reconstruction_shape() {
        let model = SequenceAutoencoder::new(small_config());
        let window = Array2::from_shape_fn((6, 3), |(t, f)| (t as f64 - f as f64) * 0.3);

        let reconstruction = model.reconstruct(&window).unwrap();
        assert_eq!(reconstruction.dim(), (6, 3));
    }

    #[test]
    fn test_latent_code_is_non_negative() {
        let model = SequenceAutoencoder::new(small_config());
        let window = Array2::from_shape_fn((6, 3), |(t, f)| ((t * 3 + f) as f64).cos());
        let code = model.encode(&window).unwrap();
        assert_eq!(code.dim(), (2, 1));
        assert!(code.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_wrong_window_shape_is_rejected() {
        let model = SequenceAutoencoder::new(small_config());
        assert!(matches!(
            model.reconstruct(&Array2::zeros((5, 3))),
            Err(ForecastError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_decoder_mirrors_encoder() {
        let config = AutoencoderConfig::default();
        assert_eq!(config.decoder_units(), vec![16, 32]);
        let model = SequenceAutoencoder::new(config);
        assert_eq!(model.decoder.hidden_sizes(), vec![16, 32]);
        assert_eq!(model.output.dimensions(), (32, 12));
    }

    #[test]
    fn test_zero_output_layer_reconstructs_bias() {
        let mut model = SequenceAutoencoder::new(small_config());
        let top_width = model.output.dimensions().0;
        assert_eq!(top_width, 5);
        model.output = LinearLayer::from_weights(Array2::zeros((3, top_width)), ndarray::arr2(&[[1.0], [2.0], [3.0]]));

        let reconstruction = model.reconstruct(&Array2::ones((6, 3))).unwrap();
        for row in reconstruction.rows() {
            assert_eq!(row.to_vec(), vec![1.0, 2.0, 3.0]);
        }
    }
}
