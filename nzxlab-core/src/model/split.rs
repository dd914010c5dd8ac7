//! Random train/test partition of row indices.

use super::ModelError;
use crate::rng::{SeedHierarchy, SPLIT_STREAM};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl TrainTestSplit {
    /// Pick `items` at `indices`, in index order.
    pub fn take<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
        indices.iter().map(|&i| items[i].clone()).collect()
    }
}

/// Shuffle `0..n` and cut it: the first `ceil(n * test_ratio)` indices are
/// the test set, the rest the training set.
pub fn train_test_split(n: usize, test_ratio: f64, seed: u64) -> Result<TrainTestSplit, ModelError> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(ModelError::InvalidConfig(format!(
            "test ratio {test_ratio} must be between 0 and 1"
        )));
    }
    let n_test = (n as f64 * test_ratio).ceil() as usize;
    if n_test == 0 {
        return Err(ModelError::EmptySplit {
            rows: n,
            test_ratio,
            side: "test",
        });
    }
    if n_test >= n {
        return Err(ModelError::EmptySplit {
            rows: n,
            test_ratio,
            side: "training",
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut SeedHierarchy::new(seed).rng_for(SPLIT_STREAM, 0));
    let train = order.split_off(n_test);
    Ok(TrainTestSplit { train, test: order })
}
