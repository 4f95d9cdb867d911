use ndarray::{Array2, Axis};

pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Layer normalization over the feature axis of a (features, tokens) input.
#[derive(Clone, Debug)]
pub struct LayerNorm {
    pub gamma: Array2<f64>, // (features, 1)
    pub beta: Array2<f64>,  // (features, 1)
    pub eps: f64,
}

impl LayerNorm {
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Array2::ones((features, 1)),
            beta: Array2::zeros((features, 1)),
            eps: LAYER_NORM_EPS,
        }
    }

    pub fn from_weights(gamma: Array2<f64>, beta: Array2<f64>) -> Self {
        assert_eq!(gamma.dim(), beta.dim(), "gamma and beta must share a shape");
        Self { gamma, beta, eps: LAYER_NORM_EPS }
    }

    pub fn features(&self) -> usize {
        self.gamma.nrows()
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let mut output = input.clone();

        for mut column in output.axis_iter_mut(Axis(1)) {
            let n = column.len() as f64;
            let mean = column.sum() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let inv_std = 1.0 / (var + self.eps).sqrt();
            column.mapv_inplace(|v| (v - mean) * inv_std);
        }

        output * &self.gamma + &self.beta
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_columns_are_normalized() {
        let norm = LayerNorm::new(3);
        let output = norm.forward(&arr2(&[[1.0, 10.0], [2.0, 10.0], [3.0, 40.0]]));

        for column in output.axis_iter(Axis(1)) {
            let mean = column.sum() / 3.0;
            assert!(mean.abs() < 1e-9);
        }
        assert!(output[[0, 0]] < 0.0 && output[[2, 0]] > 0.0);
    }

    #[test]
    fn test_zero_input_maps_to_beta() {
        let norm = LayerNorm::from_weights(arr2(&[[2.0], [2.0]]), arr2(&[[0.25], [-1.0]]));
        let output = norm.forward(&Array2::zeros((2, 4)));
        assert!(output.row(0).iter().all(|&v| (v - 0.25).abs() < 1e-12));
        assert!(output.row(1).iter().all(|&v| (v + 1.0).abs() < 1e-12));
    }
}
