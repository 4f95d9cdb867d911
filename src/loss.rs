use ndarray::Array2;

/// Error measure between a prediction and its reference.
pub trait LossFunction {
    /// Compute the loss between predictions and targets
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64;
}

/// Mean Squared Error, averaged over every element.
///
/// This is the reconstruction score of the anomaly detector: a
/// `time_steps × features` window and its reconstruction reduce to one value.
pub struct MSELoss;

impl LossFunction for MSELoss {
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        if predictions.is_empty() {
            return 0.0;
        }
        let diff = predictions - targets;
        let squared_diff = &diff * &diff;
        squared_diff.sum() / (predictions.len() as f64)
    }
}

/// Mean Absolute Error loss function
pub struct MAELoss;

impl LossFunction for MAELoss {
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        if predictions.is_empty() {
            return 0.0;
        }
        let diff = predictions - targets;
        diff.map(|x| x.abs()).sum() / (predictions.len() as f64)
    }
}
