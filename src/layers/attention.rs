use ndarray::{concatenate, s, Array2, Axis};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;

use crate::layers::linear::LinearLayer;
use crate::utils::softmax_rows;

/// Multi-head scaled dot-product self-attention (no masking).
///
/// Queries, keys and values come from one packed input projection of shape
/// (3*d_model, d_model), split row-wise in that order. Tokens are columns.
#[derive(Clone, Debug)]
pub struct MultiHeadSelfAttention {
    pub in_proj_weight: Array2<f64>, // (3*d_model, d_model)
    pub in_proj_bias: Array2<f64>,   // (3*d_model, 1)
    pub out_proj: LinearLayer,
    pub d_model: usize,
    pub n_heads: usize,
}

impl MultiHeadSelfAttention {
    pub fn new(d_model: usize, n_heads: usize) -> Self {
        assert!(n_heads > 0, "n_heads must be positive");
        assert_eq!(d_model % n_heads, 0, "d_model must be divisible by n_heads");

        let scale = (6.0 / (d_model + 3 * d_model) as f64).sqrt();
        Self {
            in_proj_weight: Array2::random((3 * d_model, d_model), Uniform::new(-scale, scale)),
            in_proj_bias: Array2::zeros((3 * d_model, 1)),
            out_proj: LinearLayer::new(d_model, d_model),
            d_model,
            n_heads,
        }
    }

    pub fn from_weights(in_proj_weight: Array2<f64>, in_proj_bias: Array2<f64>, out_proj: LinearLayer, n_heads: usize) -> Self {
        let d_model = out_proj.output_size;
        assert_eq!(in_proj_weight.dim(), (3 * d_model, d_model), "in_proj_weight must be (3*d_model, d_model)");
        assert_eq!(d_model % n_heads, 0, "d_model must be divisible by n_heads");

        Self { in_proj_weight, in_proj_bias, out_proj, d_model, n_heads }
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    /// `input` is (d_model, tokens); output has the same shape.
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let d = self.d_model;
        let head_dim = self.head_dim();
        let scale = 1.0 / (head_dim as f64).sqrt();

        let qkv = &self.in_proj_weight.dot(input) + &self.in_proj_bias;
        let q = qkv.slice(s![0..d, ..]);
        let k = qkv.slice(s![d..2 * d, ..]);
        let v = qkv.slice(s![2 * d..3 * d, ..]);

        let mut heads = Vec::with_capacity(self.n_heads);
        for h in 0..self.n_heads {
            let rows = h * head_dim..(h + 1) * head_dim;
            let q_h = q.slice(s![rows.clone(), ..]);
            let k_h = k.slice(s![rows.clone(), ..]);
            let v_h = v.slice(s![rows, ..]);

            // scores[i, j]: query token i attending to key token j
            let scores = q_h.t().dot(&k_h) * scale;
            let weights = softmax_rows(&scores);
            heads.push(v_h.dot(&weights.t()));
        }

        let views: Vec<_> = heads.iter().map(|a| a.view()).collect();
        let concat = concatenate(Axis(0), &views)
            .unwrap_or_else(|_| Array2::zeros((d, input.ncols())));

        self.out_proj.forward(&concat)
    }

    pub fn num_parameters(&self) -> usize {
        self.in_proj_weight.len() + self.in_proj_bias.len() + self.out_proj.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_attention_preserves_shape() {
        let attn = MultiHeadSelfAttention::new(8, 4);
        let input = Array2::from_shape_fn((8, 5), |(i, j)| (i * 5 + j) as f64 * 0.01);
        assert_eq!(attn.forward(&input).dim(), (8, 5));
    }

    #[test]
    fn test_identical_tokens_attend_uniformly() {
        // Identical tokens get identical outputs regardless of weights.
        let attn = MultiHeadSelfAttention::new(4, 2);
        let input = arr2(&[[1.0, 1.0, 1.0], [0.5, 0.5, 0.5], [-1.0, -1.0, -1.0], [2.0, 2.0, 2.0]]);
        let output = attn.forward(&input);
        for row in output.axis_iter(Axis(0)) {
            assert!((row[0] - row[1]).abs() < 1e-12);
            assert!((row[1] - row[2]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_value_passthrough_with_identity_projections() {
        let d = 2;
        let mut in_proj = Array2::zeros((3 * d, d));
        in_proj.slice_mut(s![2 * d..3 * d, ..]).assign(&Array2::eye(d));
        let out_proj = LinearLayer::from_weights(Array2::eye(d), Array2::zeros((d, 1)));
        let attn = MultiHeadSelfAttention::from_weights(in_proj, Array2::zeros((3 * d, 1)), out_proj, 1);

        // Zero queries/keys give uniform weights: output is the mean token.
        let input = arr2(&[[1.0, 3.0], [2.0, 6.0]]);
        let output = attn.forward(&input);
        assert_eq!(output, arr2(&[[2.0, 2.0], [4.0, 4.0]]));
    }
}
