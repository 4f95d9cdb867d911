/// Stacked LSTM run over whole sequences.
pub mod lstm_network;

/// LSTM sequence autoencoder used for anomaly scoring.
pub mod autoencoder;

/// Patch-embedding transformer forecaster.
pub mod patch_forecaster;
