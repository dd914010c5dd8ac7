//! Binary classifiers for the BeatIndex label.
//!
//! CART decision trees grown on Gini impurity, bagged into a random forest,
//! plus the train/test split and the classification metrics used to report
//! a fit.

pub mod forest;
pub mod metrics;
pub mod split;
pub mod tree;

pub use forest::{ForestConfig, RandomForest};
pub use metrics::{ClassificationMetrics, ConfusionMatrix};
pub use split::{train_test_split, TrainTestSplit};
pub use tree::{DecisionTree, MaxFeatures, TreeConfig};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    #[error("no training rows")]
    EmptyTrainingSet,

    #[error("{features} feature rows but {labels} labels")]
    LabelCountMismatch { features: usize, labels: usize },

    #[error("row {row}: expected {expected} features, found {found}")]
    RaggedFeatures {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("split of {rows} rows with test ratio {test_ratio} leaves no {side} rows")]
    EmptySplit {
        rows: usize,
        test_ratio: f64,
        side: &'static str,
    },

    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    #[error("model has not been fitted")]
    NotFitted,
}

/// Check that `features` is a non-empty rectangular matrix matching `labels`.
/// Returns the number of features per row.
pub(crate) fn check_matrix(features: &[Vec<f64>], labels: &[bool]) -> Result<usize, ModelError> {
    if features.len() != labels.len() {
        return Err(ModelError::LabelCountMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }
    let Some(first) = features.first() else {
        return Err(ModelError::EmptyTrainingSet);
    };
    let expected = first.len();
    for (row, f) in features.iter().enumerate() {
        if f.len() != expected {
            return Err(ModelError::RaggedFeatures {
                row,
                expected,
                found: f.len(),
            });
        }
    }
    Ok(expected)
}
