//! Fixed-length windows over time-ordered rows.
//!
//! All inputs are `(rows, features)` with rows in time order.

use ndarray::{s, Array2};
use rand::seq::index::sample;
use rand::Rng;

use crate::error::{ForecastError, Result};

/// One supervised example: `seq_len` input rows and the `pred_len` rows after them.
pub type WindowPair = (Array2<f64>, Array2<f64>);

/// Number of patches of `patch_len` rows taken every `stride` rows.
pub fn patch_count(seq_len: usize, patch_len: usize, stride: usize) -> usize {
    if seq_len < patch_len || stride == 0 {
        return 0;
    }
    (seq_len - patch_len) / stride + 1
}

/// Start row of every patch.
pub fn patch_starts(seq_len: usize, patch_len: usize, stride: usize) -> Vec<usize> {
    (0..patch_count(seq_len, patch_len, stride))
        .map(|i| i * stride)
        .collect()
}

/// The last `seq_len` rows.
pub fn trailing_window(data: &Array2<f64>, seq_len: usize) -> Result<Array2<f64>> {
    let available = data.nrows();
    if available < seq_len {
        return Err(ForecastError::InsufficientHistory { required: seq_len, available });
    }
    Ok(data.slice(s![available - seq_len.., ..]).to_owned())
}

/// Every overlapping `(input, target)` pair, oldest first.
///
/// Pair `i` uses rows `[i, i + seq_len)` as input and
/// `[i + seq_len, i + seq_len + pred_len)` as target, for
/// `i in 0..=rows - seq_len - pred_len`.
pub fn training_pairs(data: &Array2<f64>, seq_len: usize, pred_len: usize) -> Result<Vec<WindowPair>> {
    let available = data.nrows();
    let total = seq_len + pred_len;
    if available < total {
        return Err(ForecastError::InsufficientHistory { required: total, available });
    }

    Ok((0..=available - total)
        .map(|i| {
            let input = data.slice(s![i..i + seq_len, ..]).to_owned();
            let target = data.slice(s![i + seq_len..i + total, ..]).to_owned();
            (input, target)
        })
        .collect())
}

/// Chronological split: the first `train_ratio` of the pairs train, the rest validate.
pub fn split_train_validation(pairs: Vec<WindowPair>, train_ratio: f64) -> (Vec<WindowPair>, Vec<WindowPair>) {
    let ratio = train_ratio.clamp(0.0, 1.0);
    let split = (pairs.len() as f64 * ratio) as usize;
    let mut train = pairs;
    let validation = train.split_off(split);
    (train, validation)
}

/// All windows of `time_steps` rows at stride 1.
pub fn sliding_windows(data: &Array2<f64>, time_steps: usize) -> Result<Vec<Array2<f64>>> {
    let available = data.nrows();
    if time_steps == 0 || available < time_steps {
        return Err(ForecastError::InsufficientHistory { required: time_steps, available });
    }

    Ok((0..=available - time_steps)
        .map(|i| data.slice(s![i..i + time_steps, ..]).to_owned())
        .collect())
}

/// Keep at most `max_samples` windows chosen uniformly without replacement.
///
/// Surviving windows keep their chronological order.
pub fn subsample_windows<R: Rng + ?Sized>(
    windows: Vec<Array2<f64>>,
    max_samples: usize,
    rng: &mut R,
) -> Vec<Array2<f64>> {
    if windows.len() <= max_samples {
        return windows;
    }

    let mut keep = sample(rng, windows.len(), max_samples).into_vec();
    keep.sort_unstable();

    let mut keep = keep.into_iter().peekable();
    windows
        .into_iter()
        .enumerate()
        .filter_map(|(i, w)| {
            if keep.peek() == Some(&i) {
                keep.next();
                Some(w)
            } else {
                None
            }
        })
        .collect()
}
