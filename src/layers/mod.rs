/// Fully connected layer.
pub mod linear;

/// Dropout regularization (identity at inference).
pub mod dropout;

/// LSTM cell used by the reconstruction detector.
pub mod lstm_cell;

/// Layer normalization over the feature axis.
pub mod layer_norm;

/// Multi-head self-attention.
pub mod attention;

/// Transformer encoder blocks.
pub mod encoder;
