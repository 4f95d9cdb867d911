use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ndarray::{Array2, Dimension};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::anomaly::AnomalyDetector;
use crate::layers::attention::MultiHeadSelfAttention;
use crate::layers::dropout::Dropout;
use crate::layers::encoder::{TransformerEncoder, TransformerEncoderLayer};
use crate::layers::layer_norm::LayerNorm;
use crate::layers::linear::LinearLayer;
use crate::layers::lstm_cell::{CellActivation, LSTMCell};
use crate::models::autoencoder::{AutoencoderConfig, SequenceAutoencoder};
use crate::models::lstm_network::LSTMNetwork;
use crate::models::patch_forecaster::{ForecasterConfig, PatchForecaster, HEAD_HIDDEN};
use crate::scaler::{FeatureScaler, MissingScalerPolicy, ScalerRegistry};

/// Errors that can occur while reading or writing model artifacts
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    /// The artifact decoded but does not describe a usable model.
    #[error("schema mismatch: {0}")]
    Schema(String),
}

fn schema(message: impl Into<String>) -> ArtifactError {
    ArtifactError::Schema(message.into())
}

fn check_shape(field: &str, found: (usize, usize), expected: (usize, usize)) -> Result<(), ArtifactError> {
    if found != expected {
        return Err(schema(format!("{field}: expected shape {expected:?}, found {found:?}")));
    }
    Ok(())
}

/// Serializable version of Array2<f64> for persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializableArray2 {
    data: Vec<f64>,
    shape: (usize, usize),
}

impl From<&Array2<f64>> for SerializableArray2 {
    fn from(array: &Array2<f64>) -> Self {
        Self {
            data: array.iter().cloned().collect(),
            shape: array.raw_dim().into_pattern(),
        }
    }
}

impl SerializableArray2 {
    /// Rebuild the array, requiring `expected` as its shape.
    pub fn into_array(self, field: &str, expected: (usize, usize)) -> Result<Array2<f64>, ArtifactError> {
        check_shape(field, self.shape, expected)?;
        Array2::from_shape_vec(self.shape, self.data)
            .map_err(|e| schema(format!("{field}: {e}")))
    }
}

/// Serializable linear layer parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializableLinear {
    weight: SerializableArray2,
    bias: SerializableArray2,
}

impl From<&LinearLayer> for SerializableLinear {
    fn from(layer: &LinearLayer) -> Self {
        Self { weight: (&layer.weight).into(), bias: (&layer.bias).into() }
    }
}

impl SerializableLinear {
    fn into_layer(self, field: &str, input_size: usize, output_size: usize) -> Result<LinearLayer, ArtifactError> {
        let weight = self.weight.into_array(&format!("{field}.weight"), (output_size, input_size))?;
        let bias = self.bias.into_array(&format!("{field}.bias"), (output_size, 1))?;
        Ok(LinearLayer::from_weights(weight, bias))
    }
}

/// Serializable LSTM cell parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializableLSTMCell {
    w_ih: SerializableArray2,
    w_hh: SerializableArray2,
    b_ih: SerializableArray2,
    b_hh: SerializableArray2,
    activation: CellActivation,
}

impl From<&LSTMCell> for SerializableLSTMCell {
    fn from(cell: &LSTMCell) -> Self {
        Self {
            w_ih: (&cell.w_ih).into(),
            w_hh: (&cell.w_hh).into(),
            b_ih: (&cell.b_ih).into(),
            b_hh: (&cell.b_hh).into(),
            activation: cell.activation,
        }
    }
}

impl SerializableLSTMCell {
    fn into_cell(self, field: &str, input_size: usize, hidden_size: usize) -> Result<LSTMCell, ArtifactError> {
        let gates = 4 * hidden_size;
        Ok(LSTMCell {
            w_ih: self.w_ih.into_array(&format!("{field}.w_ih"), (gates, input_size))?,
            w_hh: self.w_hh.into_array(&format!("{field}.w_hh"), (gates, hidden_size))?,
            b_ih: self.b_ih.into_array(&format!("{field}.b_ih"), (gates, 1))?,
            b_hh: self.b_hh.into_array(&format!("{field}.b_hh"), (gates, 1))?,
            input_size,
            hidden_size,
            activation: self.activation,
        })
    }
}

fn network_to_cells(network: &LSTMNetwork) -> Vec<SerializableLSTMCell> {
    network.get_cells().iter().map(|cell| cell.into()).collect()
}

fn cells_into_network(
    field: &str,
    cells: Vec<SerializableLSTMCell>,
    input_size: usize,
    hidden_sizes: &[usize],
) -> Result<LSTMNetwork, ArtifactError> {
    if cells.len() != hidden_sizes.len() {
        return Err(schema(format!(
            "{field}: expected {} layers, found {}",
            hidden_sizes.len(),
            cells.len()
        )));
    }

    let mut layer_input = input_size;
    let mut restored = Vec::with_capacity(cells.len());
    for (i, (cell, &hidden)) in cells.into_iter().zip(hidden_sizes).enumerate() {
        restored.push(cell.into_cell(&format!("{field}[{i}]"), layer_input, hidden)?);
        layer_input = hidden;
    }
    Ok(LSTMNetwork::from_cells(restored, input_size))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializableLayerNorm {
    gamma: SerializableArray2,
    beta: SerializableArray2,
}

impl From<&LayerNorm> for SerializableLayerNorm {
    fn from(norm: &LayerNorm) -> Self {
        Self { gamma: (&norm.gamma).into(), beta: (&norm.beta).into() }
    }
}

impl SerializableLayerNorm {
    fn into_norm(self, field: &str, features: usize) -> Result<LayerNorm, ArtifactError> {
        Ok(LayerNorm::from_weights(
            self.gamma.into_array(&format!("{field}.gamma"), (features, 1))?,
            self.beta.into_array(&format!("{field}.beta"), (features, 1))?,
        ))
    }
}

/// One encoder block: attention, feed-forward and both norms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializableEncoderLayer {
    in_proj_weight: SerializableArray2,
    in_proj_bias: SerializableArray2,
    out_proj: SerializableLinear,
    linear1: SerializableLinear,
    linear2: SerializableLinear,
    norm1: SerializableLayerNorm,
    norm2: SerializableLayerNorm,
}

impl From<&TransformerEncoderLayer> for SerializableEncoderLayer {
    fn from(layer: &TransformerEncoderLayer) -> Self {
        Self {
            in_proj_weight: (&layer.self_attn.in_proj_weight).into(),
            in_proj_bias: (&layer.self_attn.in_proj_bias).into(),
            out_proj: (&layer.self_attn.out_proj).into(),
            linear1: (&layer.linear1).into(),
            linear2: (&layer.linear2).into(),
            norm1: (&layer.norm1).into(),
            norm2: (&layer.norm2).into(),
        }
    }
}

impl SerializableEncoderLayer {
    fn into_layer(self, field: &str, config: &ForecasterConfig) -> Result<TransformerEncoderLayer, ArtifactError> {
        let d = config.d_model;
        let ff = 4 * d;
        let self_attn = MultiHeadSelfAttention::from_weights(
            self.in_proj_weight.into_array(&format!("{field}.in_proj_weight"), (3 * d, d))?,
            self.in_proj_bias.into_array(&format!("{field}.in_proj_bias"), (3 * d, 1))?,
            self.out_proj.into_layer(&format!("{field}.out_proj"), d, d)?,
            config.n_heads,
        );

        Ok(TransformerEncoderLayer {
            self_attn,
            linear1: self.linear1.into_layer(&format!("{field}.linear1"), d, ff)?,
            linear2: self.linear2.into_layer(&format!("{field}.linear2"), ff, d)?,
            norm1: self.norm1.into_norm(&format!("{field}.norm1"), d)?,
            norm2: self.norm2.into_norm(&format!("{field}.norm2"), d)?,
            dropout: Dropout::new(config.dropout),
        })
    }
}

fn restore_registry(
    names: Vec<String>,
    scalers: BTreeMap<String, FeatureScaler>,
    policy: MissingScalerPolicy,
) -> Result<ScalerRegistry, ArtifactError> {
    let registry = ScalerRegistry::from_parts(names, scalers, policy)
        .map_err(|missing| schema(format!("scalers: missing for {}", missing.join(", "))))?;
    if let Some((name, _)) = registry.scalers().iter().find(|(_, s)| !s.is_valid()) {
        return Err(schema(format!("scalers: non-finite statistics for {name}")));
    }
    Ok(registry)
}

/// Model metadata for tracking where an artifact came from
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelMetadata {
    pub model_name: String,
    pub version: String,
    pub created_at: String,
    pub description: Option<String>,
}

impl ModelMetadata {
    pub fn new(model_name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            model_name: model_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            description,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForecasterWeights {
    patch_embed: SerializableLinear,
    pos_embed: SerializableArray2,
    encoder_layers: Vec<SerializableEncoderLayer>,
    head_hidden: SerializableLinear,
    head_output: SerializableLinear,
}

/// Everything needed to rebuild a forecaster and its scalers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForecasterArtifact {
    pub metadata: ModelMetadata,
    pub config: ForecasterConfig,
    /// Feature axis of the model, in order.
    pub target_names: Vec<String>,
    pub scalers: BTreeMap<String, FeatureScaler>,
    pub weights: ForecasterWeights,
}

impl ForecasterArtifact {
    pub fn from_model(model: &PatchForecaster, registry: &ScalerRegistry, metadata: ModelMetadata) -> Self {
        Self {
            metadata,
            config: model.config.clone(),
            target_names: registry.feature_order().to_vec(),
            scalers: registry.scalers().clone(),
            weights: ForecasterWeights {
                patch_embed: (&model.patch_embed).into(),
                pos_embed: (&model.pos_embed).into(),
                encoder_layers: model.encoder.layers.iter().map(|l| l.into()).collect(),
                head_hidden: (&model.head_hidden).into(),
                head_output: (&model.head_output).into(),
            },
        }
    }

    /// Validate and rebuild the model (in evaluation mode) and its registry.
    pub fn into_model(
        self,
        policy: MissingScalerPolicy,
    ) -> Result<(PatchForecaster, ScalerRegistry, ModelMetadata), ArtifactError> {
        let config = self.config;
        config.validate().map_err(|e| schema(format!("config: {e}")))?;
        if self.target_names.len() != config.num_features {
            return Err(schema(format!(
                "target_names: {} names for {} features",
                self.target_names.len(),
                config.num_features
            )));
        }

        let registry = restore_registry(self.target_names, self.scalers, policy)?;

        let w = self.weights;
        let d = config.d_model;
        if w.encoder_layers.len() != config.n_layers {
            return Err(schema(format!(
                "encoder_layers: expected {}, found {}",
                config.n_layers,
                w.encoder_layers.len()
            )));
        }

        let patch_embed = w.patch_embed.into_layer("patch_embed", config.patch_width(), d)?;
        let pos_embed = w.pos_embed.into_array("pos_embed", (d, config.num_patches()))?;
        let layers = w
            .encoder_layers
            .into_iter()
            .enumerate()
            .map(|(i, layer)| layer.into_layer(&format!("encoder_layers[{i}]"), &config))
            .collect::<Result<Vec<_>, _>>()?;
        let head_hidden = w.head_hidden.into_layer("head_hidden", d, HEAD_HIDDEN)?;
        let head_output = w
            .head_output
            .into_layer("head_output", HEAD_HIDDEN, config.pred_len * config.num_features)?;

        let model = PatchForecaster::from_parts(
            config,
            patch_embed,
            pos_embed,
            TransformerEncoder::from_layers(layers),
            head_hidden,
            head_output,
        );
        Ok((model, registry, self.metadata))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorWeights {
    encoder: Vec<SerializableLSTMCell>,
    latent: SerializableLinear,
    decoder: Vec<SerializableLSTMCell>,
    output: SerializableLinear,
}

/// Autoencoder weights, its own scalers and the learned threshold.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorArtifact {
    pub metadata: ModelMetadata,
    pub config: AutoencoderConfig,
    pub threshold: f64,
    pub feature_names: Vec<String>,
    pub scalers: BTreeMap<String, FeatureScaler>,
    pub weights: DetectorWeights,
}

impl DetectorArtifact {
    pub fn from_detector(detector: &AnomalyDetector, metadata: ModelMetadata) -> Self {
        let ae = &detector.autoencoder;
        Self {
            metadata,
            config: ae.config.clone(),
            threshold: detector.threshold,
            feature_names: detector.registry.feature_order().to_vec(),
            scalers: detector.registry.scalers().clone(),
            weights: DetectorWeights {
                encoder: network_to_cells(&ae.encoder),
                latent: (&ae.latent).into(),
                decoder: network_to_cells(&ae.decoder),
                output: (&ae.output).into(),
            },
        }
    }

    pub fn into_detector(self, policy: MissingScalerPolicy) -> Result<(AnomalyDetector, ModelMetadata), ArtifactError> {
        let config = self.config;
        if config.time_steps == 0 || config.latent_dim == 0 || config.encoder_units.is_empty() {
            return Err(schema("config: time_steps, latent_dim and encoder_units must be non-empty"));
        }
        if self.feature_names.len() != config.features {
            return Err(schema(format!(
                "feature_names: {} names for {} features",
                self.feature_names.len(),
                config.features
            )));
        }
        if !self.threshold.is_finite() {
            return Err(schema("threshold must be finite"));
        }

        let registry = restore_registry(self.feature_names, self.scalers, policy)?;

        let w = self.weights;
        let decoder_units = config.decoder_units();
        let encoder = cells_into_network("encoder", w.encoder, config.features, &config.encoder_units)?;
        let latent = w.latent.into_layer("latent", encoder.output_size(), config.latent_dim)?;
        let decoder = cells_into_network("decoder", w.decoder, config.latent_dim, &decoder_units)?;
        let output = w.output.into_layer("output", decoder.output_size(), config.features)?;

        let autoencoder = SequenceAutoencoder::from_parts(config, encoder, latent, decoder, output);
        Ok((AnomalyDetector::new(autoencoder, registry, self.threshold), self.metadata))
    }
}

/// Model persistence operations
pub struct ModelPersistence;

impl ModelPersistence {
    /// Save to JSON format (human-readable)
    pub fn save_to_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<(), ArtifactError> {
        let json = serde_json::to_string_pretty(value)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Load from JSON format
    pub fn load_from_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ArtifactError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save to binary format (compact and fast)
    pub fn save_to_binary<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<(), ArtifactError> {
        let encoded = bincode::serialize(value)?;
        let mut file = File::create(path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Load from binary format
    pub fn load_from_binary<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ArtifactError> {
        let mut file = File::open(path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(bincode::deserialize(&contents)?)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
}

/// Convenience trait for artifact saving/loading
///
/// The format is chosen by file extension: `.json` is JSON, anything else
/// is binary.
pub trait PersistentArtifact: Serialize + DeserializeOwned + Sized {
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        if is_json(path) {
            ModelPersistence::save_to_json(self, path)?;
        } else {
            ModelPersistence::save_to_binary(self, path)?;
        }
        info!(path = %path.display(), "saved artifact");
        Ok(())
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let artifact = if is_json(path) {
            ModelPersistence::load_from_json(path)?
        } else {
            ModelPersistence::load_from_binary(path)?
        };
        info!(path = %path.display(), "loaded artifact");
        Ok(artifact)
    }
}

impl PersistentArtifact for ForecasterArtifact {}
impl PersistentArtifact for DetectorArtifact {}
