//! Patch-embedding transformer forecaster.
//!
//! The input window is cut into overlapping patches, each patch is flattened
//! and linearly embedded, a learned positional vector is added per patch
//! index, the patch sequence runs through a transformer encoder, the encoded
//! patches are averaged and a small head maps the result to the whole
//! `(pred_len, num_features)` horizon in one shot.

use ndarray::{s, Array2, Axis};
use ndarray_rand::RandomExt;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::layers::dropout::Dropout;
use crate::layers::encoder::TransformerEncoder;
use crate::layers::linear::LinearLayer;
use crate::loss::{LossFunction, MAELoss, MSELoss};
use crate::scaler::ScalerRegistry;
use crate::utils::relu;
use crate::windowing::{patch_count, patch_starts, WindowPair};

/// Hidden width of the forecasting head.
pub const HEAD_HIDDEN: usize = 64;

/// Architecture hyperparameters. Fixed for the lifetime of a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecasterConfig {
    pub num_features: usize,
    pub seq_len: usize,
    pub pred_len: usize,
    pub patch_len: usize,
    pub stride: usize,
    pub d_model: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub dropout: f64,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            num_features: 12,
            seq_len: 128,
            pred_len: 24,
            patch_len: 16,
            stride: 8,
            d_model: 64,
            n_layers: 2,
            n_heads: 4,
            dropout: 0.1,
        }
    }
}

impl ForecasterConfig {
    pub fn num_patches(&self) -> usize {
        patch_count(self.seq_len, self.patch_len, self.stride)
    }

    /// Length of one flattened patch.
    pub fn patch_width(&self) -> usize {
        self.patch_len * self.num_features
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.num_features == 0 || self.pred_len == 0 {
            return Err("num_features and pred_len must be positive".to_string());
        }
        if self.patch_len == 0 || self.stride == 0 {
            return Err("patch_len and stride must be positive".to_string());
        }
        if self.seq_len < self.patch_len {
            return Err(format!("seq_len {} is shorter than patch_len {}", self.seq_len, self.patch_len));
        }
        if self.n_heads == 0 || self.d_model % self.n_heads != 0 {
            return Err(format!("d_model {} is not divisible by n_heads {}", self.d_model, self.n_heads));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(format!("dropout {} outside [0, 1)", self.dropout));
        }
        Ok(())
    }
}

/// Accuracy of a forecaster over held-out pairs.
#[derive(Clone, Debug, Serialize)]
pub struct EvaluationReport {
    pub windows: usize,
    /// Mean squared error over every element, normalized space.
    pub mse: f64,
    /// Mean absolute error per feature, in feature order.
    pub feature_mae: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct PatchForecaster {
    pub config: ForecasterConfig,
    pub patch_embed: LinearLayer,       // (d_model, patch_len * num_features)
    pub pos_embed: Array2<f64>,         // (d_model, num_patches)
    pub encoder: TransformerEncoder,
    pub head_hidden: LinearLayer,       // (HEAD_HIDDEN, d_model)
    pub head_output: LinearLayer,       // (pred_len * num_features, HEAD_HIDDEN)
    pub dropout: Dropout,
}

impl PatchForecaster {
    /// Freshly initialized model in evaluation mode.
    ///
    /// Panics when `n_heads` does not divide `d_model` or `dropout` is outside
    /// `[0, 1)`; use [`try_new`](Self::try_new) for untrusted configs.
    pub fn new(config: ForecasterConfig) -> Self {
        let num_patches = config.num_patches();
        let mut model = Self {
            patch_embed: LinearLayer::new(config.patch_width(), config.d_model),
            pos_embed: Array2::random((config.d_model, num_patches), StandardNormal),
            encoder: TransformerEncoder::new(config.d_model, config.n_heads, config.n_layers, config.dropout),
            head_hidden: LinearLayer::new(config.d_model, HEAD_HIDDEN),
            head_output: LinearLayer::new(HEAD_HIDDEN, config.pred_len * config.num_features),
            dropout: Dropout::new(config.dropout),
            config,
        };
        model.eval();
        model
    }

    /// Validate `config` before building the model.
    pub fn try_new(config: ForecasterConfig) -> Result<Self> {
        config.validate().map_err(ForecastError::InvalidConfig)?;
        Ok(Self::new(config))
    }

    pub fn from_parts(
        config: ForecasterConfig,
        patch_embed: LinearLayer,
        pos_embed: Array2<f64>,
        encoder: TransformerEncoder,
        head_hidden: LinearLayer,
        head_output: LinearLayer,
    ) -> Self {
        let mut model = Self {
            dropout: Dropout::new(config.dropout),
            config,
            patch_embed,
            pos_embed,
            encoder,
            head_hidden,
            head_output,
        };
        model.eval();
        model
    }

    pub fn train(&mut self) {
        self.dropout.train();
        self.encoder.train();
    }

    pub fn eval(&mut self) {
        self.dropout.eval();
        self.encoder.eval();
    }

    /// Flattened patches as columns: `(patch_len * num_features, num_patches)`.
    ///
    /// Within a patch, values are laid out time-major: index `t * num_features + f`.
    pub fn make_patches(&self, window: &Array2<f64>) -> Array2<f64> {
        let c = &self.config;
        let starts = patch_starts(c.seq_len, c.patch_len, c.stride);
        let mut patches = Array2::zeros((c.patch_width(), starts.len()));

        for (p, &start) in starts.iter().enumerate() {
            let patch = window.slice(s![start..start + c.patch_len, ..]);
            for (i, v) in patch.iter().enumerate() {
                patches[[i, p]] = *v;
            }
        }
        patches
    }

    /// Normalized `(seq_len, num_features)` window in, normalized
    /// `(pred_len, num_features)` forecast out.
    pub fn forward(&self, window: &Array2<f64>) -> Result<Array2<f64>> {
        let c = &self.config;
        let expected = (c.seq_len, c.num_features);
        if window.dim() != expected {
            return Err(ForecastError::ShapeMismatch {
                context: "forecaster input window",
                expected,
                found: window.dim(),
            });
        }

        let patches = self.make_patches(window);
        let embedded = self.patch_embed.forward(&patches) + &self.pos_embed;
        let encoded = self.encoder.forward(&self.dropout.forward(&embedded));

        // global average over patches
        let pooled = encoded
            .mean_axis(Axis(1))
            .unwrap_or_else(|| ndarray::Array1::zeros(c.d_model))
            .insert_axis(Axis(1));

        let hidden = self.dropout.forward(&self.head_hidden.forward(&pooled).mapv(relu));
        let flat = self.head_output.forward(&hidden);

        // row-major reshape: element p * num_features + f is step p, feature f
        Array2::from_shape_vec((c.pred_len, c.num_features), flat.iter().cloned().collect())
            .map_err(|_| ForecastError::ShapeMismatch {
                context: "forecast head output",
                expected: (c.pred_len * c.num_features, 1),
                found: flat.dim(),
            })
    }

    /// Score the model on normalized `(input, target)` pairs.
    pub fn evaluate(&self, pairs: &[WindowPair]) -> Result<EvaluationReport> {
        let n = self.config.num_features;
        let mut squared = 0.0;
        let mut mae = vec![0.0; n];

        for (input, target) in pairs {
            let prediction = self.forward(input)?;
            squared += MSELoss.compute_loss(&prediction, target);
            for (f, total) in mae.iter_mut().enumerate() {
                let p = prediction.column(f).insert_axis(Axis(1)).to_owned();
                let t = target.column(f).insert_axis(Axis(1)).to_owned();
                *total += MAELoss.compute_loss(&p, &t);
            }
        }

        let windows = pairs.len();
        let denom = windows.max(1) as f64;
        Ok(EvaluationReport {
            windows,
            mse: squared / denom,
            feature_mae: mae.into_iter().map(|m| m / denom).collect(),
        })
    }

    /// Per-feature MAE in real units, using `registry` to undo normalization.
    pub fn evaluate_denormalized(&self, pairs: &[WindowPair], registry: &ScalerRegistry) -> Result<EvaluationReport> {
        let n = self.config.num_features;
        let mut squared = 0.0;
        let mut mae = vec![0.0; n];

        for (input, target) in pairs {
            let prediction = registry.denormalize(&self.forward(input)?)?;
            let actual = registry.denormalize(target)?;
            squared += MSELoss.compute_loss(prediction.values(), actual.values());
            for (f, total) in mae.iter_mut().enumerate() {
                let diff = &prediction.values().column(f) - &actual.values().column(f);
                *total += diff.mapv(f64::abs).mean().unwrap_or(0.0);
            }
        }

        let windows = pairs.len();
        let denom = windows.max(1) as f64;
        Ok(EvaluationReport {
            windows,
            mse: squared / denom,
            feature_mae: mae.into_iter().map(|m| m / denom).collect(),
        })
    }

    pub fn num_parameters(&self) -> usize {
        self.patch_embed.num_parameters()
            + self.pos_embed.len()
            + self.encoder.num_parameters()
            + self.head_hidden.num_parameters()
            + self.head_output.num_parameters()
    }
}
