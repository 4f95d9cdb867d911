use ndarray::Array2;
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;

/// Inverted dropout for regularization
///
/// Only active in training mode. Loaded models are switched to evaluation
/// mode, where the layer is the identity and the forward pass stays a pure
/// function of the input and the weights.
#[derive(Clone, Debug)]
pub struct Dropout {
    pub dropout_rate: f64,
    pub is_training: bool,
}

impl Dropout {
    pub fn new(dropout_rate: f64) -> Self {
        assert!((0.0..=1.0).contains(&dropout_rate),
                "Dropout rate must be between 0.0 and 1.0");

        Dropout {
            dropout_rate,
            is_training: true,
        }
    }

    pub fn train(&mut self) {
        self.is_training = true;
    }

    pub fn eval(&mut self) {
        self.is_training = false;
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        if !self.is_training || self.dropout_rate == 0.0 {
            return input.clone();
        }
        if self.dropout_rate >= 1.0 {
            return Array2::zeros(input.raw_dim());
        }

        let keep_prob = 1.0 - self.dropout_rate;
        let mask = Array2::random(input.raw_dim(), Uniform::new(0.0, 1.0))
            .mapv(|x| if x < keep_prob { 1.0 } else { 0.0 });

        input * &mask / keep_prob
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_dropout_eval_is_identity() {
        let mut dropout = Dropout::new(0.5);
        let input = arr2(&[[1.0, 2.0], [3.0, 4.0]]);

        dropout.eval();
        assert_eq!(dropout.forward(&input), input);
    }

    #[test]
    fn test_dropout_train_scales_kept_values() {
        let dropout = Dropout::new(0.5);
        let input = Array2::ones((20, 20));

        let output = dropout.forward(&input);
        assert!(output.iter().all(|&x| x == 0.0 || (x - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_full_dropout_zeroes_everything() {
        let dropout = Dropout::new(1.0);
        let output = dropout.forward(&Array2::ones((3, 3)));
        assert!(output.iter().all(|&x| x == 0.0));
    }
}
