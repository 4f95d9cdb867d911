use ndarray::{Array2, s};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use serde::{Deserialize, Serialize};
use crate::utils::{relu, sigmoid, tanh};

/// Nonlinearity used for the cell candidate and the cell output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellActivation {
    Tanh,
    Relu,
}

impl CellActivation {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            CellActivation::Tanh => tanh(x),
            CellActivation::Relu => relu(x),
        }
    }
}

/// LSTM cell
///
/// Implements the standard LSTM equations, where `act` is the configured
/// cell activation (tanh by default, relu for the reconstruction detector):
/// - i_t = σ(W_xi * x_t + W_hi * h_t-1 + b_i)
/// - f_t = σ(W_xf * x_t + W_hf * h_t-1 + b_f)
/// - g_t = act(W_xg * x_t + W_hg * h_t-1 + b_g)
/// - o_t = σ(W_xo * x_t + W_ho * h_t-1 + b_o)
/// - c_t = f_t ⊙ c_t-1 + i_t ⊙ g_t
/// - h_t = o_t ⊙ act(c_t)
#[derive(Clone, Debug)]
pub struct LSTMCell {
    pub w_ih: Array2<f64>,  // input-to-hidden weights (4*hidden_size, input_size)
    pub w_hh: Array2<f64>,  // hidden-to-hidden weights (4*hidden_size, hidden_size)
    pub b_ih: Array2<f64>,  // input-to-hidden bias (4*hidden_size, 1)
    pub b_hh: Array2<f64>,  // hidden-to-hidden bias (4*hidden_size, 1)
    pub input_size: usize,
    pub hidden_size: usize,
    pub activation: CellActivation,
}

impl LSTMCell {
    /// Creates new LSTM cell with uniform weight initialization
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        let dist = Uniform::new(-0.1, 0.1);

        LSTMCell {
            w_ih: Array2::random((4 * hidden_size, input_size), dist),
            w_hh: Array2::random((4 * hidden_size, hidden_size), dist),
            b_ih: Array2::zeros((4 * hidden_size, 1)),
            b_hh: Array2::zeros((4 * hidden_size, 1)),
            input_size,
            hidden_size,
            activation: CellActivation::Tanh,
        }
    }

    pub fn with_activation(mut self, activation: CellActivation) -> Self {
        self.activation = activation;
        self
    }

    /// One time step. `input` is (input_size, 1), states are (hidden_size, 1).
    pub fn forward(&self, input: &Array2<f64>, hx: &Array2<f64>, cx: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let h = self.hidden_size;
        let act = self.activation;

        // Compute all gates in one product: [input_gate, forget_gate, cell_gate, output_gate]
        let gates = &self.w_ih.dot(input) + &self.b_ih + &self.w_hh.dot(hx) + &self.b_hh;

        let input_gate = gates.slice(s![0..h, ..]).map(|&x| sigmoid(x));
        let forget_gate = gates.slice(s![h..2 * h, ..]).map(|&x| sigmoid(x));
        let cell_gate = gates.slice(s![2 * h..3 * h, ..]).map(|&x| act.apply(x));
        let output_gate = gates.slice(s![3 * h..4 * h, ..]).map(|&x| sigmoid(x));

        // Cell state update: f_t ⊙ c_t-1 + i_t ⊙ g_t
        let cy = &forget_gate * cx + &input_gate * &cell_gate;

        // Hidden state: o_t ⊙ act(c_t)
        let hy = &output_gate * &cy.map(|&x| act.apply(x));

        (hy, cy)
    }

    pub fn num_parameters(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.b_ih.len() + self.b_hh.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_lstm_cell_forward() {
        let input_size = 3;
        let hidden_size = 2;
        let cell = LSTMCell::new(input_size, hidden_size);

        let input = arr2(&[[0.5], [0.1], [-0.3]]);
        let hx = arr2(&[[0.0], [0.0]]);
        let cx = arr2(&[[0.0], [0.0]]);

        let (hy, cy) = cell.forward(&input, &hx, &cx);

        assert_eq!(hy.shape(), &[hidden_size, 1]);
        assert_eq!(cy.shape(), &[hidden_size, 1]);
    }

    #[test]
    fn test_activation_apply() {
        assert!((CellActivation::Tanh.apply(0.5) - 0.5f64.tanh()).abs() < 1e-12);
        assert_eq!(CellActivation::Relu.apply(-1.5), 0.0);
        assert_eq!(CellActivation::Relu.apply(2.0), 2.0);
    }

    #[test]
    fn test_relu_cell_never_emits_negative_hidden() {
        let cell = LSTMCell::new(4, 5).with_activation(CellActivation::Relu);
        let input = arr2(&[[1.0], [-2.0], [0.5], [3.0]]);
        let mut hx = Array2::zeros((5, 1));
        let mut cx = Array2::zeros((5, 1));

        for _ in 0..10 {
            let (h, c) = cell.forward(&input, &hx, &cx);
            hx = h;
            cx = c;
        }
        assert!(hx.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_gate_math_with_known_weights() {
        // Zero weights: every gate pre-activation is the bias.
        let mut cell = LSTMCell::new(1, 1);
        cell.w_ih.fill(0.0);
        cell.w_hh.fill(0.0);
        cell.b_ih = arr2(&[[0.0], [0.0], [1.0], [0.0]]);

        let (hy, cy) = cell.forward(&arr2(&[[7.0]]), &arr2(&[[0.0]]), &arr2(&[[0.0]]));

        let expected_c = 0.5 * 1.0f64.tanh();
        assert!((cy[[0, 0]] - expected_c).abs() < 1e-12);
        assert!((hy[[0, 0]] - 0.5 * expected_c.tanh()).abs() < 1e-12);
    }
}
