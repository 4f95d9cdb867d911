use ndarray::Array2;
use crate::layers::lstm_cell::{CellActivation, LSTMCell};

/// Multi-layer LSTM network run over whole sequences
///
/// Stacks LSTM cells where the output of layer i at step t becomes the input
/// of layer i+1 at step t. Each layer keeps its own hidden and cell state, so
/// layers may have different widths.
#[derive(Clone, Debug)]
pub struct LSTMNetwork {
    cells: Vec<LSTMCell>,
    pub input_size: usize,
}

impl LSTMNetwork {
    /// Creates a network with one layer per entry of `hidden_sizes`.
    pub fn new(input_size: usize, hidden_sizes: &[usize]) -> Self {
        let mut cells = Vec::with_capacity(hidden_sizes.len());
        let mut layer_input_size = input_size;

        for &hidden_size in hidden_sizes {
            cells.push(LSTMCell::new(layer_input_size, hidden_size));
            layer_input_size = hidden_size;
        }

        LSTMNetwork { cells, input_size }
    }

    /// Use `activation` for the candidate and output nonlinearity of every layer.
    pub fn with_activation(mut self, activation: CellActivation) -> Self {
        for cell in &mut self.cells {
            cell.activation = activation;
        }
        self
    }

    /// Creates a network from existing cells (used for deserialization)
    pub fn from_cells(cells: Vec<LSTMCell>, input_size: usize) -> Self {
        LSTMNetwork { cells, input_size }
    }

    /// Get reference to the cells (used for serialization)
    pub fn get_cells(&self) -> &[LSTMCell] {
        &self.cells
    }

    pub fn hidden_sizes(&self) -> Vec<usize> {
        self.cells.iter().map(|c| c.hidden_size).collect()
    }

    /// Width of the top layer's output.
    pub fn output_size(&self) -> usize {
        self.cells.last().map_or(self.input_size, |c| c.hidden_size)
    }

    /// Run a sequence through the stack from zero initial state.
    ///
    /// `sequence` is `(time_steps, input_size)`; the result is
    /// `(time_steps, output_size)` holding the top layer's hidden state at every step.
    pub fn forward_sequence(&self, sequence: &Array2<f64>) -> Array2<f64> {
        let steps = sequence.nrows();
        let mut hx: Vec<Array2<f64>> = self.cells.iter().map(|c| Array2::zeros((c.hidden_size, 1))).collect();
        let mut cx = hx.clone();
        let mut outputs = Array2::zeros((steps, self.output_size()));

        for (t, row) in sequence.rows().into_iter().enumerate() {
            let mut current = row.to_owned().insert_axis(ndarray::Axis(1));

            for (i, cell) in self.cells.iter().enumerate() {
                let (new_h, new_c) = cell.forward(&current, &hx[i], &cx[i]);
                current = new_h.clone();
                hx[i] = new_h;
                cx[i] = new_c;
            }

            outputs.row_mut(t).assign(&current.column(0));
        }

        outputs
    }

    /// Top layer's hidden state after the final step, as a `(output_size, 1)` column.
    pub fn forward_last(&self, sequence: &Array2<f64>) -> Array2<f64> {
        let outputs = self.forward_sequence(sequence);
        match outputs.nrows() {
            0 => Array2::zeros((self.output_size(), 1)),
            n => outputs.row(n - 1).to_owned().insert_axis(ndarray::Axis(1)),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.cells.iter().map(|c| c.num_parameters()).sum()
    }
}
