use ndarray::Array2;

use crate::layers::attention::MultiHeadSelfAttention;
use crate::layers::dropout::Dropout;
use crate::layers::layer_norm::LayerNorm;
use crate::layers::linear::LinearLayer;
use crate::utils::relu;

/// Post-norm transformer encoder block
///
/// - x = norm1(x + dropout(attention(x)))
/// - x = norm2(x + dropout(linear2(dropout(relu(linear1(x))))))
///
/// The feed-forward width is `4 * d_model`.
#[derive(Clone, Debug)]
pub struct TransformerEncoderLayer {
    pub self_attn: MultiHeadSelfAttention,
    pub linear1: LinearLayer,
    pub linear2: LinearLayer,
    pub norm1: LayerNorm,
    pub norm2: LayerNorm,
    pub dropout: Dropout,
}

impl TransformerEncoderLayer {
    pub fn new(d_model: usize, n_heads: usize, dropout_rate: f64) -> Self {
        let ff_width = 4 * d_model;
        Self {
            self_attn: MultiHeadSelfAttention::new(d_model, n_heads),
            linear1: LinearLayer::new(d_model, ff_width),
            linear2: LinearLayer::new(ff_width, d_model),
            norm1: LayerNorm::new(d_model),
            norm2: LayerNorm::new(d_model),
            dropout: Dropout::new(dropout_rate),
        }
    }

    pub fn train(&mut self) {
        self.dropout.train();
    }

    pub fn eval(&mut self) {
        self.dropout.eval();
    }

    /// `input` is (d_model, tokens).
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let attended = self.dropout.forward(&self.self_attn.forward(input));
        let x = self.norm1.forward(&(input + &attended));

        let hidden = self.linear1.forward(&x).mapv(relu);
        let ff = self.dropout.forward(&self.linear2.forward(&self.dropout.forward(&hidden)));
        self.norm2.forward(&(&x + &ff))
    }

    pub fn num_parameters(&self) -> usize {
        self.self_attn.num_parameters()
            + self.linear1.num_parameters()
            + self.linear2.num_parameters()
            + self.norm1.num_parameters()
            + self.norm2.num_parameters()
    }
}

/// Stack of encoder blocks applied in order.
#[derive(Clone, Debug)]
pub struct TransformerEncoder {
    pub layers: Vec<TransformerEncoderLayer>,
}

impl TransformerEncoder {
    pub fn new(d_model: usize, n_heads: usize, n_layers: usize, dropout_rate: f64) -> Self {
        Self {
            layers: (0..n_layers)
                .map(|_| TransformerEncoderLayer::new(d_model, n_heads, dropout_rate))
                .collect(),
        }
    }

    pub fn from_layers(layers: Vec<TransformerEncoderLayer>) -> Self {
        Self { layers }
    }

    pub fn train(&mut self) {
        self.layers.iter_mut().for_each(TransformerEncoderLayer::train);
    }

    pub fn eval(&mut self) {
        self.layers.iter_mut().for_each(TransformerEncoderLayer::eval);
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward(&x))
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_layer_shape() {
        let mut layer = TransformerEncoderLayer::new(16, 4, 0.1);
        layer.eval();
        let input = Array2::from_shape_fn((16, 15), |(i, j)| ((i + j) as f64).sin());
        assert_eq!(layer.forward(&input).dim(), (16, 15));
        assert_eq!(layer.linear1.output_size, 64);
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let mut encoder = TransformerEncoder::new(8, 2, 2, 0.5);
        encoder.eval();
        let input = Array2::from_shape_fn((8, 6), |(i, j)| (i as f64 - j as f64) * 0.1);
        assert_eq!(encoder.forward(&input), encoder.forward(&input));
    }

    #[test]
    fn test_output_columns_are_layer_normalized() {
        let mut encoder = TransformerEncoder::new(8, 2, 1, 0.0);
        encoder.eval();
        let output = encoder.forward(&Array2::from_elem((8, 3), 0.7));
        for column in output.columns() {
            assert!((column.sum() / 8.0).abs() < 1e-9);
        }
    }
}
