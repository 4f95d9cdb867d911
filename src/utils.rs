/// Activation and reduction helpers shared by the layers.
use ndarray::{Array2, Axis};

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Hyperbolic tangent activation: tanh(x) = (e^x - e^(-x)) / (e^x + e^(-x))
pub fn tanh(x: f64) -> f64 {
    x.tanh()
}

/// Rectified linear unit: max(0, x)
pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Numerically stable softmax applied independently to every row.
pub fn softmax_rows(x: &Array2<f64>) -> Array2<f64> {
    let mut result = x.clone();

    for mut row in result.axis_iter_mut(Axis(0)) {
        let max_val = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max_val).exp());
        let sum_exp = row.sum();
        if sum_exp > 0.0 {
            row.mapv_inplace(|v| v / sum_exp);
        }
    }

    result
}

/// Mean and population standard deviation of a slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-10);
        assert!(sigmoid(1000.0) > 0.99);
        assert!(sigmoid(-1000.0) < 0.01);
    }

    #[test]
    fn test_tanh() {
        assert!((tanh(0.0) - 0.0).abs() < 1e-10);
        assert!(tanh(1000.0) > 0.99);
        assert!(tanh(-1000.0) < -0.99);
    }

    #[test]
    fn test_relu() {
        assert_eq!(relu(-2.0), 0.0);
        assert_eq!(relu(3.5), 3.5);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let input = arr2(&[[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        let output = softmax_rows(&input);

        for row in output.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!((output[[1, 0]] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }
}
