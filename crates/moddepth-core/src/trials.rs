//! Trial matrices and random trial subsampling.

use ndarray::{Array3, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Axis holding trials in a `[channels, trials, samples]` matrix.
pub const TRIAL_AXIS: Axis = Axis(1);

/// Epoched recording for one polarity: channels (or taper components) ×
/// trials × time samples.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialMatrix {
    data: Array3<f64>,
}

impl TrialMatrix {
    pub fn new(data: Array3<f64>) -> Self {
        TrialMatrix { data }
    }

    pub fn n_channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_trials(&self) -> usize {
        self.data.len_of(TRIAL_AXIS)
    }

    pub fn n_samples(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.n_channels(), self.n_trials(), self.n_samples()]
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// New matrix holding only `trials`, in the given order.
    ///
    /// Panics if an index is out of range; callers pass indices drawn from
    /// `0..n_trials()`.
    pub fn select_trials(&self, trials: &[usize]) -> TrialMatrix {
        TrialMatrix {
            data: self.data.select(TRIAL_AXIS, trials),
        }
    }

    /// Row-major copy of the samples, the layout used on the estimator wire.
    pub fn to_row_major(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }
}

/// Wire form of a trial matrix: shape plus row-major values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodedMatrix {
    pub shape: [usize; 3],
    pub values: Vec<f64>,
}

impl From<&TrialMatrix> for EncodedMatrix {
    fn from(m: &TrialMatrix) -> Self {
        EncodedMatrix {
            shape: m.shape(),
            values: m.to_row_major(),
        }
    }
}

/// Uniform random permutation of `0..n_trials`, truncated to `count`.
/// Returns fewer than `count` indices only when `n_trials < count`.
pub fn draw_trial_subset<R: Rng + ?Sized>(n_trials: usize, count: usize, rng: &mut R) -> Vec<usize> {
    let mut permuted: Vec<usize> = (0..n_trials).collect();
    permuted.shuffle(rng);
    permuted.truncate(count);
    permuted
}
